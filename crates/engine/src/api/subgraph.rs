//! GraphQL subgraph client — order-fill events, token mappings, sync status
//!
//! Queries are composed by hand (no codegen): a small builder assembles the
//! `where:` clause from optional filters. The subgraph caps pages at 1000
//! records; addresses are lowercased before insertion into the query.

use super::{FetchError, FetchResult};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_SUBGRAPH_URL: &str = "https://api.goldsky.com/api/public/project_cl6mb8i9h0003e201j6li0diw/subgraphs/polymarket-orderbook-resync/prod/gn";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Hard page cap imposed by the subgraph
pub const SUBGRAPH_PAGE_CAP: u32 = 1000;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilledEvent {
    pub id: String,
    /// Unix seconds as a decimal string (subgraph BigInt)
    pub timestamp: String,
    pub maker: String,
    pub taker: String,
    pub maker_asset_id: String,
    pub taker_asset_id: String,
    /// Wei with USDC's 10^6 scale
    pub maker_amount_filled: String,
    pub taker_amount_filled: String,
}

/// Authoritative token id -> condition id mapping entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    /// Token id as a decimal string
    pub id: String,
    pub condition: Option<String>,
    pub outcome_index: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserBalance {
    pub id: String,
    pub user: String,
    pub asset: AssetRef,
    pub balance: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaBlock {
    pub number: u64,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubgraphMeta {
    pub block: MetaBlock,
    pub has_indexing_errors: bool,
}

// ---------------------------------------------------------------------------
// Query builder
// ---------------------------------------------------------------------------

/// Optional filters for order-filled event queries
#[derive(Debug, Clone, Default)]
pub struct OrderFilledFilter {
    pub from_ts: Option<i64>,
    pub to_ts: Option<i64>,
    /// Matches the event's maker-side asset id
    pub token_id: Option<String>,
    pub maker: Option<String>,
    pub taker: Option<String>,
}

impl OrderFilledFilter {
    /// Render the `where:` entries. Addresses are lowercased; BigInt values
    /// are rendered as quoted strings.
    fn where_entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if let Some(ts) = self.from_ts {
            entries.push(("timestamp_gte".into(), format!("\"{ts}\"")));
        }
        if let Some(ts) = self.to_ts {
            entries.push(("timestamp_lte".into(), format!("\"{ts}\"")));
        }
        if let Some(token) = &self.token_id {
            entries.push(("makerAssetId".into(), format!("\"{token}\"")));
        }
        if let Some(maker) = &self.maker {
            entries.push(("maker".into(), format!("\"{}\"", maker.to_lowercase())));
        }
        if let Some(taker) = &self.taker {
            entries.push(("taker".into(), format!("\"{}\"", taker.to_lowercase())));
        }
        entries
    }

    /// Same filter but matched against the taker-side asset id
    fn with_token_on_taker_side(&self) -> Vec<(String, String)> {
        self.where_entries()
            .into_iter()
            .map(|(field, value)| {
                if field == "makerAssetId" {
                    ("takerAssetId".to_string(), value)
                } else {
                    (field, value)
                }
            })
            .collect()
    }
}

fn render_where(entries: &[(String, String)]) -> String {
    if entries.is_empty() {
        return String::new();
    }
    let inner: Vec<String> = entries
        .iter()
        .map(|(field, value)| format!("{field}: {value}"))
        .collect();
    format!(", where: {{{}}}", inner.join(", "))
}

fn build_order_filled_query(
    entries: &[(String, String)],
    order_by: &str,
    order_direction: &str,
    first: u32,
    skip: u32,
) -> String {
    let first = first.min(SUBGRAPH_PAGE_CAP);
    format!(
        "{{ orderFilledEvents(first: {first}, skip: {skip}, orderBy: {order_by}, \
         orderDirection: {order_direction}{}) {{ id timestamp maker taker makerAssetId \
         takerAssetId makerAmountFilled takerAmountFilled }} }}",
        render_where(entries)
    )
}

fn build_market_datas_query(first: u32, skip: u32) -> String {
    let first = first.min(SUBGRAPH_PAGE_CAP);
    format!("{{ marketDatas(first: {first}, skip: {skip}) {{ id condition outcomeIndex }} }}")
}

fn build_user_balances_query(user: &str, first: u32, skip: u32) -> String {
    let first = first.min(SUBGRAPH_PAGE_CAP);
    format!(
        "{{ userBalances(first: {first}, skip: {skip}, where: {{user: \"{}\"}}) \
         {{ id user asset {{ id }} balance }} }}",
        user.to_lowercase()
    )
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct OrderFilledData {
    #[serde(rename = "orderFilledEvents")]
    order_filled_events: Vec<OrderFilledEvent>,
}

#[derive(Debug, Deserialize)]
struct MarketDatasData {
    #[serde(rename = "marketDatas")]
    market_datas: Vec<MarketData>,
}

#[derive(Debug, Deserialize)]
struct UserBalancesData {
    #[serde(rename = "userBalances")]
    user_balances: Vec<UserBalance>,
}

#[derive(Debug, Deserialize)]
struct MetaData {
    #[serde(rename = "_meta")]
    meta: SubgraphMeta,
}

// ---------------------------------------------------------------------------
// Client implementation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SubgraphClient {
    client: Client,
    url: String,
}

impl Default for SubgraphClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl SubgraphClient {
    pub fn new(url: Option<&str>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
                .build()
                .expect("Failed to build HTTP client"),
            url: url.unwrap_or(DEFAULT_SUBGRAPH_URL).to_string(),
        }
    }

    async fn execute<T: serde::de::DeserializeOwned>(&self, query: &str) -> FetchResult<T> {
        debug!(query, "Subgraph query");
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "query": query }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(FetchError::from_status(resp.status()));
        }

        let envelope: GraphqlResponse<T> = resp.json().await?;
        if let Some(errors) = envelope.errors {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            if message.to_lowercase().contains("rate limit") {
                return Err(FetchError::RateLimited);
            }
            return Err(FetchError::Graphql(message));
        }

        envelope
            .data
            .ok_or_else(|| FetchError::Graphql("empty data".into()))
    }

    /// One page of order-filled events
    pub async fn order_filled_events(
        &self,
        filter: &OrderFilledFilter,
        order_by: &str,
        order_direction: &str,
        first: u32,
        skip: u32,
    ) -> FetchResult<Vec<OrderFilledEvent>> {
        let query = build_order_filled_query(
            &filter.where_entries(),
            order_by,
            order_direction,
            first,
            skip,
        );
        let data: OrderFilledData = self.execute(&query).await?;
        debug!(count = data.order_filled_events.len(), "Order-filled events fetched");
        Ok(data.order_filled_events)
    }

    /// Order-filled events where the token appears on either side of the
    /// fill. Two queries, merged and deduplicated by event id.
    pub async fn order_filled_events_for_token(
        &self,
        filter: &OrderFilledFilter,
        first: u32,
    ) -> FetchResult<Vec<OrderFilledEvent>> {
        let maker_side = build_order_filled_query(
            &filter.where_entries(),
            "timestamp",
            "desc",
            first,
            0,
        );
        let taker_side = build_order_filled_query(
            &filter.with_token_on_taker_side(),
            "timestamp",
            "desc",
            first,
            0,
        );

        let maker_data: OrderFilledData = self.execute(&maker_side).await?;
        let taker_data: OrderFilledData = self.execute(&taker_side).await?;

        let mut merged = maker_data.order_filled_events;
        let seen: std::collections::HashSet<String> =
            merged.iter().map(|e| e.id.clone()).collect();
        merged.extend(
            taker_data
                .order_filled_events
                .into_iter()
                .filter(|e| !seen.contains(&e.id)),
        );
        merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(merged)
    }

    /// One page of token -> condition mappings
    pub async fn market_datas(&self, first: u32, skip: u32) -> FetchResult<Vec<MarketData>> {
        let query = build_market_datas_query(first, skip);
        let data: MarketDatasData = self.execute(&query).await?;
        Ok(data.market_datas)
    }

    /// Outcome-token balances held by a user
    pub async fn user_balances(&self, user: &str, first: u32, skip: u32) -> FetchResult<Vec<UserBalance>> {
        let query = build_user_balances_query(user, first, skip);
        let data: UserBalancesData = self.execute(&query).await?;
        Ok(data.user_balances)
    }

    /// Subgraph sync status — also serves as the health probe
    pub async fn meta(&self) -> FetchResult<SubgraphMeta> {
        let query = "{ _meta { block { number timestamp } hasIndexingErrors } }";
        let data: MetaData = self.execute(query).await?;
        Ok(data.meta)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_clause_lowercases_addresses() {
        let filter = OrderFilledFilter {
            maker: Some("0xABCDEF".into()),
            ..Default::default()
        };
        let query = build_order_filled_query(&filter.where_entries(), "timestamp", "desc", 500, 0);
        assert!(query.contains("maker: \"0xabcdef\""));
        assert!(!query.contains("0xABCDEF"));
    }

    #[test]
    fn test_first_capped_at_page_limit() {
        let query = build_order_filled_query(&[], "timestamp", "desc", 5000, 0);
        assert!(query.contains("first: 1000"));
    }

    #[test]
    fn test_empty_filter_omits_where() {
        let query = build_order_filled_query(&[], "timestamp", "asc", 100, 200);
        assert!(!query.contains("where"));
        assert!(query.contains("skip: 200"));
        assert!(query.contains("orderDirection: asc"));
    }

    #[test]
    fn test_timestamp_filters_render_as_bigint_strings() {
        let filter = OrderFilledFilter {
            from_ts: Some(1_700_000_000),
            to_ts: Some(1_700_100_000),
            ..Default::default()
        };
        let query = build_order_filled_query(&filter.where_entries(), "timestamp", "desc", 1000, 0);
        assert!(query.contains("timestamp_gte: \"1700000000\""));
        assert!(query.contains("timestamp_lte: \"1700100000\""));
    }

    #[test]
    fn test_token_filter_swaps_to_taker_side() {
        let filter = OrderFilledFilter {
            token_id: Some("12345".into()),
            from_ts: Some(1),
            ..Default::default()
        };
        let entries = filter.with_token_on_taker_side();
        assert!(entries.iter().any(|(f, v)| f == "takerAssetId" && v == "\"12345\""));
        assert!(entries.iter().all(|(f, _)| f != "makerAssetId"));
    }

    #[test]
    fn test_event_deserializes_from_subgraph_shape() {
        let raw = r#"{
            "id": "0xabc-0",
            "timestamp": "1700000000",
            "maker": "0x1111",
            "taker": "0x2222",
            "makerAssetId": "0",
            "takerAssetId": "987654321",
            "makerAmountFilled": "150000000",
            "takerAmountFilled": "300000000"
        }"#;
        let event: OrderFilledEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.maker_asset_id, "0");
        assert_eq!(event.taker_amount_filled, "300000000");
    }
}
