//! Market enricher — metadata sync, resolution detection, stub merging
//!
//! Resolution rule: a market is resolved when exactly one outcome price
//! exceeds 0.99. More than one such price is an ambiguous resolution; the
//! market is left unresolved and the condition counted, never guessed.

use crate::api::{fetch_all_pages, ApiMarket, DataApiClient, FetchResult, PagedSource};
use crate::ingest::{apply_resolution, market_record_from_api};
use crate::token_map::TokenMapping;
use async_trait::async_trait;
use chrono::Utc;
use persistence::repository::MarketRepository;
use persistence::SqlitePool;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

const RESOLUTION_PRICE: &str = "0.99";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionCheck {
    Unresolved,
    Resolved(usize),
    /// More than one outcome price above the threshold
    Ambiguous,
}

/// Inspect outcome prices for a settled market
pub fn detect_resolution(prices: &[Decimal]) -> ResolutionCheck {
    let threshold = Decimal::from_str(RESOLUTION_PRICE).expect("const threshold parses");
    let winners: Vec<usize> = prices
        .iter()
        .enumerate()
        .filter(|(_, p)| **p > threshold)
        .map(|(i, _)| i)
        .collect();
    match winners.as_slice() {
        [] => ResolutionCheck::Unresolved,
        [index] => ResolutionCheck::Resolved(*index),
        _ => ResolutionCheck::Ambiguous,
    }
}

fn parse_price_list(raw: &str) -> Vec<Decimal> {
    let values: Vec<serde_json::Value> = serde_json::from_str(raw).unwrap_or_default();
    values
        .iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Decimal::from_str(s).ok(),
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Market sync
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize)]
pub struct SyncSummary {
    pub fetched: u64,
    pub upserted: u64,
    pub resolved: u64,
    pub ambiguous: u64,
    pub backfilled_trades: u64,
    pub errors: u64,
    pub complete: bool,
}

struct MarketPages<'a> {
    api: &'a DataApiClient,
    active_only: bool,
}

#[async_trait]
impl PagedSource for MarketPages<'_> {
    type Item = ApiMarket;

    async fn fetch_page(&self, offset: u64, limit: u64) -> FetchResult<Vec<ApiMarket>> {
        self.api
            .get_markets(offset as u32, limit as u32, self.active_only)
            .await
    }
}

/// Pull market metadata pages from the gamma host, upsert each record, and
/// run resolution detection plus outcome backfill on the way through.
pub async fn sync_markets(
    pool: &SqlitePool,
    api: &DataApiClient,
    max_items: usize,
    active_only: bool,
    cancelled: &AtomicBool,
) -> SyncSummary {
    let source = MarketPages { api, active_only };
    let outcome = fetch_all_pages(&source, 100, max_items, cancelled).await;

    let mut summary = SyncSummary {
        fetched: outcome.items.len() as u64,
        complete: outcome.complete,
        ..Default::default()
    };

    let now = Utc::now().timestamp();
    let repo = MarketRepository::new(pool);

    for api_market in &outcome.items {
        let Some(record) = market_record_from_api(api_market, now) else {
            summary.errors += 1;
            continue;
        };

        let id = match repo.upsert(&record).await {
            Ok(id) => id,
            Err(e) => {
                summary.errors += 1;
                warn!(error = %e, condition_id = %record.condition_id, "Market upsert failed");
                continue;
            }
        };
        summary.upserted += 1;

        if let Err(e) = settle_market(pool, id, &mut summary).await {
            summary.errors += 1;
            warn!(error = %e, market_id = id, "Resolution check failed");
        }
    }

    info!(
        fetched = summary.fetched,
        upserted = summary.upserted,
        resolved = summary.resolved,
        ambiguous = summary.ambiguous,
        "Market sync finished"
    );
    summary
}

/// Detect and record a resolution for one market, backfilling its trades.
async fn settle_market(
    pool: &SqlitePool,
    market_id: i64,
    summary: &mut SyncSummary,
) -> anyhow::Result<()> {
    let repo = MarketRepository::new(pool);
    let Some(market) = repo.get_by_id(market_id).await? else {
        return Ok(());
    };
    if market.resolved_outcome.is_some() {
        return Ok(());
    }
    let Some(prices_raw) = &market.outcome_prices else {
        return Ok(());
    };

    let prices = parse_price_list(prices_raw);
    match detect_resolution(&prices) {
        ResolutionCheck::Unresolved => Ok(()),
        ResolutionCheck::Ambiguous => {
            summary.ambiguous += 1;
            warn!(
                condition_id = %market.condition_id,
                "Ambiguous resolution: multiple outcome prices above threshold"
            );
            Ok(())
        }
        ResolutionCheck::Resolved(index) => {
            let labels = market.outcome_labels();
            let Some(label) = labels.get(index) else {
                anyhow::bail!("resolved index {index} out of range for {}", market.condition_id);
            };
            let resolution_date = market.end_date.unwrap_or_else(|| Utc::now().timestamp());
            if repo.set_resolution(market_id, label, resolution_date).await? {
                summary.resolved += 1;
                let refreshed = repo
                    .get_by_id(market_id)
                    .await?
                    .expect("market exists after set_resolution");
                summary.backfilled_trades += apply_resolution(pool, &refreshed).await?;
            }
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Stub enrichment
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize)]
pub struct EnrichSummary {
    pub stubs_seen: u64,
    pub merged: u64,
    pub rewritten: u64,
    pub trades_reparented: u64,
    pub still_unmapped: u64,
    pub errors: u64,
}

/// Walk stub markets and resolve them through the subgraph token map.
///
/// When a canonical market already exists under the real condition_id the
/// stub's trades are re-parented and the stub deleted; otherwise the stub's
/// condition_id is rewritten in place. A rewrite losing a race to a
/// concurrent canonical insert falls back to the merge path.
pub async fn enrich_stub_markets(
    pool: &SqlitePool,
    api: Option<&DataApiClient>,
    subgraph_map: &TokenMapping,
) -> EnrichSummary {
    let repo = MarketRepository::new(pool);
    let mut summary = EnrichSummary::default();

    let stubs = match repo.list_stubs().await {
        Ok(stubs) => stubs,
        Err(e) => {
            warn!(error = %e, "Could not list stub markets");
            summary.errors += 1;
            return summary;
        }
    };
    summary.stubs_seen = stubs.len() as u64;

    for stub in stubs {
        match enrich_one_stub(pool, api, subgraph_map, &stub, &mut summary).await {
            Ok(()) => {}
            Err(e) => {
                summary.errors += 1;
                warn!(error = %e, condition_id = %stub.condition_id, "Stub enrichment failed");
            }
        }
    }

    info!(
        stubs = summary.stubs_seen,
        merged = summary.merged,
        rewritten = summary.rewritten,
        "Stub enrichment finished"
    );
    summary
}

async fn enrich_one_stub(
    pool: &SqlitePool,
    api: Option<&DataApiClient>,
    subgraph_map: &TokenMapping,
    stub: &persistence::repository::MarketRecord,
    summary: &mut EnrichSummary,
) -> anyhow::Result<()> {
    let repo = MarketRepository::new(pool);
    let stub_id = stub.id.expect("fetched stub has id");

    let meta = stub.meta_value();
    let Some(token_id) = meta.get("source_token_id").and_then(|v| v.as_str()) else {
        summary.still_unmapped += 1;
        return Ok(());
    };

    let Some(target) = subgraph_map.lookup(token_id) else {
        summary.still_unmapped += 1;
        return Ok(());
    };

    match repo.get_by_condition_id(&target.condition_id).await? {
        Some(canonical) => {
            let canonical_id = canonical.id.expect("fetched market has id");
            let moved = repo
                .merge_stub(stub_id, canonical_id, &canonical.condition_id)
                .await?;
            summary.merged += 1;
            summary.trades_reparented += moved;
        }
        None => {
            if repo.rewrite_condition_id(stub_id, &target.condition_id).await? {
                summary.rewritten += 1;
                // Pull real metadata onto the rewritten row when we can
                if let Some(client) = api {
                    if let Ok(fetched) = client.get_market(&target.condition_id).await {
                        if let Some(record) =
                            market_record_from_api(&fetched, Utc::now().timestamp())
                        {
                            repo.upsert(&record).await?;
                        }
                    }
                }
            } else {
                // A canonical row appeared concurrently; merge into it
                let canonical = repo
                    .get_by_condition_id(&target.condition_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("conflict but no canonical row"))?;
                let moved = repo
                    .merge_stub(stub_id, canonical.id.expect("id"), &canonical.condition_id)
                    .await?;
                summary.merged += 1;
                summary.trades_reparented += moved;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use crate::token_map::TokenTarget;
    use persistence::repository::{MarketRecord, TradeRepository};
    use persistence::Database;
    use rust_decimal_macros::dec;

    #[test]
    fn test_detect_resolution_single_winner() {
        let prices = vec![dec!(0.995), dec!(0.005)];
        assert_eq!(detect_resolution(&prices), ResolutionCheck::Resolved(0));
    }

    #[test]
    fn test_detect_resolution_none() {
        let prices = vec![dec!(0.6), dec!(0.4)];
        assert_eq!(detect_resolution(&prices), ResolutionCheck::Unresolved);
    }

    #[test]
    fn test_detect_resolution_ambiguous_left_null() {
        let prices = vec![dec!(0.999), dec!(0.991)];
        assert_eq!(detect_resolution(&prices), ResolutionCheck::Ambiguous);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // Exactly 0.99 does not resolve
        let prices = vec![dec!(0.99), dec!(0.01)];
        assert_eq!(detect_resolution(&prices), ResolutionCheck::Unresolved);
    }

    #[test]
    fn test_parse_price_list_both_forms() {
        assert_eq!(parse_price_list("[\"0.97\", \"0.03\"]"), vec![dec!(0.97), dec!(0.03)]);
        assert_eq!(parse_price_list("[0.97, 0.03]"), vec![dec!(0.97), dec!(0.03)]);
        assert!(parse_price_list("garbage").is_empty());
    }

    fn subgraph_event(id: &str, token: &str) -> crate::api::OrderFilledEvent {
        crate::api::OrderFilledEvent {
            id: id.into(),
            timestamp: "1700000000".into(),
            maker: "0xmaker".into(),
            taker: "0xtaker".into(),
            maker_asset_id: "0".into(),
            taker_asset_id: token.into(),
            maker_amount_filled: "150000000".into(),
            taker_amount_filled: "300000000".into(),
        }
    }

    fn canonical_market(condition_id: &str) -> MarketRecord {
        MarketRecord {
            id: None,
            condition_id: condition_id.into(),
            question: "Will the merger close?".into(),
            outcomes: "[\"Yes\",\"No\"]".into(),
            outcome_prices: None,
            end_date: None,
            resolution_date: None,
            resolved_outcome: None,
            volume: "0".into(),
            volume_24h: "0".into(),
            liquidity: "0".into(),
            category: "corporate".into(),
            is_event_based: true,
            is_active: true,
            meta: "{}".into(),
            last_synced_at: None,
        }
    }

    #[tokio::test]
    async fn test_stub_merged_into_canonical() {
        let db = Database::in_memory().await.unwrap();
        let token = "99887766554433221100998877665544332211";

        // Ingest an event for an unknown token -> stub + trade
        let ingestor = Ingestor::new(db.pool());
        ingestor
            .ingest_subgraph_events(&[subgraph_event("0xev-merge", token)], &Default::default(), None)
            .await;

        let repo = MarketRepository::new(db.pool());
        let stub = repo
            .get_by_condition_id(&format!("token_{}", &token[..32]))
            .await
            .unwrap()
            .unwrap();
        let stub_id = stub.id.unwrap();

        // A canonical market with metadata exists under the real condition id
        let canonical_id = repo.upsert(&canonical_market("0xrealcond")).await.unwrap();

        let mut map = TokenMapping::default();
        map.insert(
            token.into(),
            TokenTarget {
                market_id: None,
                condition_id: "0xrealcond".into(),
                outcome_index: 0,
            },
        );

        let summary = enrich_stub_markets(db.pool(), None, &map).await;
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.trades_reparented, 1);

        // Stub gone, trades under the canonical market with its condition id
        assert!(repo.get_by_id(stub_id).await.unwrap().is_none());
        let trades = TradeRepository::new(db.pool());
        assert_eq!(trades.count_for_market(stub_id).await.unwrap(), 0);
        let moved = trades.for_market(canonical_id).await.unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].condition_id, "0xrealcond");
    }

    #[tokio::test]
    async fn test_stub_condition_rewritten_when_no_canonical() {
        let db = Database::in_memory().await.unwrap();
        let token = "11223344556677889900112233445566778899";

        let ingestor = Ingestor::new(db.pool());
        ingestor
            .ingest_subgraph_events(&[subgraph_event("0xev-rewrite", token)], &Default::default(), None)
            .await;

        let repo = MarketRepository::new(db.pool());
        let stub = repo
            .get_by_condition_id(&format!("token_{}", &token[..32]))
            .await
            .unwrap()
            .unwrap();
        let stub_id = stub.id.unwrap();

        let mut map = TokenMapping::default();
        map.insert(
            token.into(),
            TokenTarget {
                market_id: None,
                condition_id: "0xfreshcond".into(),
                outcome_index: 0,
            },
        );

        let summary = enrich_stub_markets(db.pool(), None, &map).await;
        assert_eq!(summary.rewritten, 1);
        assert_eq!(summary.merged, 0);

        let rewritten = repo.get_by_id(stub_id).await.unwrap().unwrap();
        assert_eq!(rewritten.condition_id, "0xfreshcond");
        assert!(!rewritten.is_stub());
    }
}
