//! Token mapper — 256-bit outcome-token ids to (market, condition, outcome)
//!
//! Token ids are decimal strings of arbitrary length and are never parsed to
//! fixed-width integers. Two maps exist: a local one built from market
//! metadata (`clobTokenIds`) and an authoritative one paginated from the
//! subgraph's marketDatas entity.

use crate::api::{FetchResult, SubgraphClient};
use persistence::repository::MarketRepository;
use persistence::{DbResult, SqlitePool};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Where a token id points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTarget {
    /// Known only for locally-mapped tokens
    pub market_id: Option<i64>,
    pub condition_id: String,
    pub outcome_index: i64,
}

/// Token id -> target, O(1) lookup
#[derive(Debug, Default)]
pub struct TokenMapping {
    map: HashMap<String, TokenTarget>,
}

impl TokenMapping {
    pub fn lookup(&self, token_id: &str) -> Option<&TokenTarget> {
        self.map.get(token_id)
    }

    pub fn insert(&mut self, token_id: String, target: TokenTarget) {
        self.map.insert(token_id, target);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Normalize a `clobTokenIds` value to a list of decimal strings.
/// Accepts a native list, a JSON-encoded string of a list, or null.
pub fn parse_token_ids(value: &Value) -> Vec<String> {
    let list = match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    list.iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}

/// Build the local mapping by scanning market metadata
pub async fn build_local_mapping(pool: &SqlitePool, include_inactive: bool) -> DbResult<TokenMapping> {
    let repo = MarketRepository::new(pool);
    let markets = repo.list(include_inactive).await?;

    let mut mapping = TokenMapping::default();
    for market in &markets {
        let meta = market.meta_value();
        let token_ids = parse_token_ids(meta.get("clobTokenIds").unwrap_or(&Value::Null));
        for (outcome_index, token_id) in token_ids.into_iter().enumerate() {
            mapping.insert(
                token_id,
                TokenTarget {
                    market_id: market.id,
                    condition_id: market.condition_id.clone(),
                    outcome_index: outcome_index as i64,
                },
            );
        }
    }

    debug!(tokens = mapping.len(), markets = markets.len(), "Local token mapping built");
    Ok(mapping)
}

/// Build the authoritative mapping by paginating the subgraph's marketDatas
pub async fn build_subgraph_mapping(
    subgraph: &SubgraphClient,
    max_items: usize,
    cancelled: &AtomicBool,
) -> FetchResult<TokenMapping> {
    const PAGE: u32 = 1000;

    let mut mapping = TokenMapping::default();
    let mut skip = 0u32;

    loop {
        if cancelled.load(Ordering::Relaxed) || mapping.len() >= max_items {
            break;
        }

        let page = subgraph.market_datas(PAGE, skip).await?;
        let got = page.len();
        for entry in page {
            let Some(condition_id) = entry.condition else {
                continue;
            };
            let outcome_index = entry
                .outcome_index
                .as_deref()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0);
            mapping.insert(
                entry.id,
                TokenTarget {
                    market_id: None,
                    condition_id,
                    outcome_index,
                },
            );
        }

        if got < PAGE as usize {
            break;
        }
        skip += PAGE;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    info!(tokens = mapping.len(), "Subgraph token mapping built");
    Ok(mapping)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::repository::MarketRecord;
    use persistence::Database;

    #[test]
    fn test_parse_native_list() {
        let value = serde_json::json!(["123", "456"]);
        assert_eq!(parse_token_ids(&value), vec!["123", "456"]);
    }

    #[test]
    fn test_parse_json_encoded_string() {
        let value = Value::String("[\"789\", \"1011\"]".into());
        assert_eq!(parse_token_ids(&value), vec!["789", "1011"]);
    }

    #[test]
    fn test_parse_numbers_normalized_to_strings() {
        let value = serde_json::json!([123, 456]);
        assert_eq!(parse_token_ids(&value), vec!["123", "456"]);
    }

    #[test]
    fn test_parse_garbage_is_empty() {
        assert!(parse_token_ids(&Value::Null).is_empty());
        assert!(parse_token_ids(&Value::String("not json".into())).is_empty());
        assert!(parse_token_ids(&Value::Bool(true)).is_empty());
    }

    #[tokio::test]
    async fn test_local_mapping_from_market_meta() {
        let db = Database::in_memory().await.unwrap();
        let repo = MarketRepository::new(db.pool());

        let market = MarketRecord {
            id: None,
            condition_id: "0xcond1".into(),
            question: "Test?".into(),
            outcomes: "[\"Yes\",\"No\"]".into(),
            outcome_prices: None,
            end_date: None,
            resolution_date: None,
            resolved_outcome: None,
            volume: "0".into(),
            volume_24h: "0".into(),
            liquidity: "0".into(),
            category: "politics".into(),
            is_event_based: true,
            is_active: true,
            meta: serde_json::json!({"clobTokenIds": ["111", "222"]}).to_string(),
            last_synced_at: None,
        };
        let market_id = repo.upsert(&market).await.unwrap();

        let mapping = build_local_mapping(db.pool(), false).await.unwrap();
        assert_eq!(mapping.len(), 2);

        let yes = mapping.lookup("111").unwrap();
        assert_eq!(yes.market_id, Some(market_id));
        assert_eq!(yes.condition_id, "0xcond1");
        assert_eq!(yes.outcome_index, 0);

        let no = mapping.lookup("222").unwrap();
        assert_eq!(no.outcome_index, 1);
        assert!(mapping.lookup("999").is_none());
    }
}
