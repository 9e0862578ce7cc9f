//! Ingestor — normalizes raw events from both sources into trades
//!
//! The centralized path consumes API trade records; the subgraph path
//! consumes order-filled events, resolving token ids through the local map,
//! the subgraph map, and finally stub-market creation. All writes are
//! retry-safe upserts; a malformed event increments a counter and never
//! aborts the batch.

use crate::api::{ApiMarket, ApiTrade, DataApiClient, OrderFilledEvent};
use crate::token_map::{parse_token_ids, TokenMapping};
use persistence::repository::{
    MarketRecord, MarketRepository, TradeRecord, TradeRepository, TradeUpsert, WalletRepository,
};
use persistence::{DbResult, SqlitePool};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::{debug, warn};

/// USDC's decimal scale: wei amounts divide by 10^6
const USDC_SCALE: u64 = 1_000_000;

/// Per-batch outcome counters. Batches never abort on a single record.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestSummary {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub unmapped: u64,
    pub errors: u64,
}

impl IngestSummary {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.skipped
    }
}

enum RecordOutcome {
    Inserted { unmapped: bool },
    Updated,
    AlreadyIngested,
}

// ---------------------------------------------------------------------------
// Field normalization helpers
// ---------------------------------------------------------------------------

/// Normalize a string-or-list JSON value to a canonical native list string.
/// Both forms appear in the wild; the stored form is always a native list.
pub fn normalize_list(value: &Value) -> Option<String> {
    match value {
        Value::Array(_) => Some(value.to_string()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Array(_)) => Some(parsed.to_string()),
            _ => None,
        },
        _ => None,
    }
}

fn value_to_decimal_string(value: &Value) -> String {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap_or_default().to_string(),
        Value::Number(n) => n.to_string(),
        _ => "0".to_string(),
    }
}

fn parse_rfc3339(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp())
}

fn canonical_category(raw: Option<&str>) -> String {
    match raw.map(|c| c.to_lowercase()) {
        Some(c)
            if matches!(
                c.as_str(),
                "politics"
                    | "corporate"
                    | "legal"
                    | "crypto"
                    | "sports"
                    | "entertainment"
                    | "science"
            ) =>
        {
            c
        }
        _ => "other".to_string(),
    }
}

/// |price - 0.5|
pub fn price_extremity(price: Decimal) -> f64 {
    let half = Decimal::new(5, 1);
    let diff = if price >= half { price - half } else { half - price };
    diff.to_string().parse::<f64>().unwrap_or(0.0)
}

/// Days from the wallet's first appearance to the trade, floored at zero
/// when the event predates the recorded first_seen.
pub fn wallet_age_days(first_seen_at: Option<i64>, trade_timestamp: i64) -> f64 {
    match first_seen_at {
        Some(first) => ((trade_timestamp - first).max(0)) as f64 / 86_400.0,
        None => 0.0,
    }
}

/// Divide a wei string by USDC's 10^6 scale
pub fn wei_to_usdc(wei: &str) -> Option<Decimal> {
    let raw = Decimal::from_str(wei).ok()?;
    Some(raw / Decimal::from(USDC_SCALE))
}

/// Derive a transaction hash from a subgraph event id. Deterministic, so
/// re-ingesting the same event dedups on the unique index.
pub fn derive_tx_hash(event_id: &str) -> String {
    if event_id.starts_with("0x") && event_id.len() >= 66 {
        return event_id[..66].to_string();
    }
    let digest = Sha256::digest(event_id.as_bytes());
    format!("0x{}", hex_encode(&digest[..32]))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Convert gamma market metadata to a market record. None when the payload
/// lacks a condition id.
pub fn market_record_from_api(market: &ApiMarket, now: i64) -> Option<MarketRecord> {
    let condition_id = market.condition_id.clone()?;

    let outcomes = market
        .outcomes
        .as_ref()
        .and_then(normalize_list)
        .unwrap_or_else(|| "[\"Yes\",\"No\"]".to_string());
    let outcome_prices = market.outcome_prices.as_ref().and_then(normalize_list);

    let token_ids: Vec<String> = market
        .clob_token_ids
        .as_ref()
        .map(parse_token_ids)
        .unwrap_or_default();
    let meta = serde_json::json!({ "clobTokenIds": token_ids }).to_string();

    Some(MarketRecord {
        id: None,
        condition_id,
        question: market.question.clone().unwrap_or_default(),
        outcomes,
        outcome_prices,
        end_date: market.end_date.as_deref().and_then(parse_rfc3339),
        resolution_date: None,
        resolved_outcome: market.resolved_outcome.clone(),
        volume: market
            .volume
            .as_ref()
            .map(value_to_decimal_string)
            .unwrap_or_else(|| "0".into()),
        volume_24h: market
            .volume_24hr
            .map(|v| v.to_string())
            .unwrap_or_else(|| "0".into()),
        liquidity: market
            .liquidity
            .as_ref()
            .map(value_to_decimal_string)
            .unwrap_or_else(|| "0".into()),
        category: canonical_category(market.category.as_deref()),
        is_event_based: market.events.as_ref().map(|e| !e.is_empty()).unwrap_or(false),
        is_active: market.active.unwrap_or(true) && !market.closed.unwrap_or(false),
        meta,
        last_synced_at: Some(now),
    })
}

// ---------------------------------------------------------------------------
// Outcome scoring
// ---------------------------------------------------------------------------

/// A BUY is correct when it bought the resolved outcome; a SELL is correct
/// when it sold any other outcome.
pub fn trade_was_correct(side: &str, outcome: &str, resolved_outcome: &str) -> bool {
    if side.eq_ignore_ascii_case("BUY") {
        outcome == resolved_outcome
    } else {
        outcome != resolved_outcome
    }
}

/// Realized PnL for a resolved trade.
pub fn trade_profit_loss(side: &str, correct: bool, size: Decimal, price: Decimal) -> Decimal {
    let one = Decimal::ONE;
    if side.eq_ignore_ascii_case("BUY") {
        if correct {
            size * (one - price)
        } else {
            -(size * price)
        }
    } else if correct {
        size * price
    } else {
        -(size * (one - price))
    }
}

/// Hours between trade and resolution; None when the trade postdates it
pub fn hours_before(resolution_date: i64, trade_timestamp: i64) -> Option<f64> {
    let delta = resolution_date - trade_timestamp;
    if delta < 0 {
        return None;
    }
    Some(delta as f64 / 3600.0)
}

/// Backfill was_correct / profit_loss / hours_before_resolution for every
/// trade on a resolved market. Returns the number of trades updated.
pub async fn apply_resolution(pool: &SqlitePool, market: &MarketRecord) -> DbResult<u64> {
    let (Some(resolved_outcome), Some(market_id)) = (&market.resolved_outcome, market.id) else {
        return Ok(0);
    };
    let resolution_date = match market.resolution_date {
        Some(ts) => ts,
        None => return Ok(0),
    };

    let trades = TradeRepository::new(pool);
    let mut updated = 0u64;
    for trade in trades.for_market(market_id).await? {
        let Some(hours) = hours_before(resolution_date, trade.trade_timestamp) else {
            continue;
        };
        let correct = trade_was_correct(&trade.side, &trade.outcome, resolved_outcome);
        let pnl = trade_profit_loss(&trade.side, correct, trade.size_decimal(), trade.price_decimal());
        trades
            .update_outcome(trade.id.expect("fetched trade has id"), correct, &pnl.to_string(), hours)
            .await?;
        updated += 1;
    }
    Ok(updated)
}

// ---------------------------------------------------------------------------
// Ingestor
// ---------------------------------------------------------------------------

pub struct Ingestor<'a> {
    pool: &'a SqlitePool,
}

impl<'a> Ingestor<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Centralized path: one API trade event at a time, batch never aborts
    pub async fn ingest_api_trades(
        &self,
        api: Option<&DataApiClient>,
        trades: &[ApiTrade],
    ) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for trade in trades {
            match self.ingest_api_trade(api, trade).await {
                Ok(RecordOutcome::Inserted { unmapped }) => {
                    summary.inserted += 1;
                    if unmapped {
                        summary.unmapped += 1;
                    }
                }
                Ok(RecordOutcome::Updated) => summary.updated += 1,
                Ok(RecordOutcome::AlreadyIngested) => summary.skipped += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(error = %e, "Skipping malformed API trade");
                }
            }
        }
        summary
    }

    async fn ingest_api_trade(
        &self,
        api: Option<&DataApiClient>,
        trade: &ApiTrade,
    ) -> anyhow::Result<RecordOutcome> {
        let tx_hash = trade
            .transaction_hash
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing transactionHash"))?;
        let condition_id = trade
            .condition_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing conditionId"))?;
        let address = trade
            .proxy_wallet
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing proxyWallet"))?;
        let timestamp = trade
            .timestamp
            .ok_or_else(|| anyhow::anyhow!("missing timestamp"))?;

        let wallets = WalletRepository::new(self.pool);
        let wallet = wallets.ensure(address, timestamp).await?;

        let markets = MarketRepository::new(self.pool);
        let market = match markets.get_by_condition_id(condition_id).await? {
            Some(m) => m,
            None => {
                let fetched = match api {
                    Some(client) => client
                        .get_market(condition_id)
                        .await
                        .ok()
                        .and_then(|m| market_record_from_api(&m, timestamp)),
                    None => None,
                };
                let record = fetched.unwrap_or_else(|| minimal_market(condition_id, timestamp));
                let id = markets.upsert(&record).await?;
                markets
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("market vanished after upsert"))?
            }
        };

        let size = Decimal::from_f64_retain(trade.size.unwrap_or(0.0)).unwrap_or_default();
        let price = Decimal::from_f64_retain(trade.price.unwrap_or(0.0))
            .unwrap_or_default()
            .round_dp(4);
        let usdc_size = match trade.usdc_size {
            Some(v) => Decimal::from_f64_retain(v).unwrap_or_default(),
            None => (size * price).round_dp(6),
        };
        let outcome_index = trade.outcome_index.unwrap_or(0);
        let outcome = trade.outcome.clone().unwrap_or_else(|| {
            market
                .outcome_labels()
                .get(outcome_index as usize)
                .cloned()
                .unwrap_or_else(|| if outcome_index == 0 { "Yes".into() } else { "No".into() })
        });
        let side = trade
            .side
            .as_deref()
            .unwrap_or("BUY")
            .to_ascii_uppercase();

        let (was_correct, profit_loss, hours) = derived_outcome(&market, &side, &outcome, size, price, timestamp);

        let record = TradeRecord {
            id: None,
            transaction_hash: tx_hash.to_string(),
            market_id: market.id.expect("fetched market has id"),
            wallet_id: wallet.id.expect("fetched wallet has id"),
            wallet_address: address.to_string(),
            condition_id: market.condition_id.clone(),
            side,
            outcome,
            outcome_index,
            size: size.to_string(),
            price: price.to_string(),
            usdc_size: usdc_size.to_string(),
            trade_timestamp: timestamp,
            hours_before_resolution: hours,
            wallet_age_days: Some(wallet_age_days(wallet.first_seen_at, timestamp)),
            wallet_trade_count: Some(wallet.total_trades),
            price_extremity: Some(price_extremity(price)),
            was_correct,
            profit_loss: profit_loss.map(|p| p.to_string()),
            meta: "{}".to_string(),
        };

        let repo = TradeRepository::new(self.pool);
        match repo.upsert(&record).await? {
            TradeUpsert::Inserted(_) => Ok(RecordOutcome::Inserted { unmapped: false }),
            TradeUpsert::Updated(_) => Ok(RecordOutcome::Updated),
        }
    }

    /// Subgraph path: order-filled events resolved through the token maps
    pub async fn ingest_subgraph_events(
        &self,
        events: &[OrderFilledEvent],
        local_map: &TokenMapping,
        subgraph_map: Option<&TokenMapping>,
    ) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for event in events {
            match self.ingest_subgraph_event(event, local_map, subgraph_map).await {
                Ok(RecordOutcome::Inserted { unmapped }) => {
                    summary.inserted += 1;
                    if unmapped {
                        summary.unmapped += 1;
                    }
                }
                Ok(RecordOutcome::Updated) => summary.updated += 1,
                Ok(RecordOutcome::AlreadyIngested) => summary.skipped += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(error = %e, event_id = %event.id, "Skipping malformed subgraph event");
                }
            }
        }
        summary
    }

    async fn ingest_subgraph_event(
        &self,
        event: &OrderFilledEvent,
        local_map: &TokenMapping,
        subgraph_map: Option<&TokenMapping>,
    ) -> anyhow::Result<RecordOutcome> {
        let fill = classify_fill(event);
        let timestamp = event
            .timestamp
            .parse::<i64>()
            .map_err(|_| anyhow::anyhow!("bad timestamp {}", event.timestamp))?;

        let size = wei_to_usdc(fill.token_amount_wei)
            .ok_or_else(|| anyhow::anyhow!("bad token amount {}", fill.token_amount_wei))?;
        let usdc_size = wei_to_usdc(fill.usdc_amount_wei)
            .ok_or_else(|| anyhow::anyhow!("bad usdc amount {}", fill.usdc_amount_wei))?;
        let price = if size.is_zero() {
            Decimal::ZERO
        } else {
            (usdc_size / size).round_dp(4)
        };

        let markets = MarketRepository::new(self.pool);
        // Resolution order: local map, subgraph map, synthetic stub
        let (market, outcome_index, unmapped) = if let Some(target) = local_map.lookup(fill.token_id)
        {
            let market = markets
                .get_by_condition_id(&target.condition_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("mapped market {} missing", target.condition_id))?;
            (market, target.outcome_index, false)
        } else if let Some(target) =
            subgraph_map.and_then(|m| m.lookup(fill.token_id))
        {
            let market = match markets.get_by_condition_id(&target.condition_id).await? {
                Some(m) => m,
                None => {
                    let record = minimal_market(&target.condition_id, timestamp);
                    let id = markets.upsert(&record).await?;
                    markets
                        .get_by_id(id)
                        .await?
                        .ok_or_else(|| anyhow::anyhow!("market vanished after upsert"))?
                }
            };
            (market, target.outcome_index, false)
        } else {
            debug!(token_id = fill.token_id, "Token unmapped, creating stub market");
            let stub = markets.insert_stub(fill.token_id, timestamp).await?;
            (stub, 0, true)
        };

        let outcome = market
            .outcome_labels()
            .get(outcome_index as usize)
            .cloned()
            .unwrap_or_else(|| if outcome_index == 0 { "Yes".into() } else { "No".into() });

        let wallets = WalletRepository::new(self.pool);
        let wallet = wallets.ensure(fill.wallet, timestamp).await?;

        let (was_correct, profit_loss, hours) =
            derived_outcome(&market, fill.side, &outcome, size, price, timestamp);

        let record = TradeRecord {
            id: None,
            transaction_hash: derive_tx_hash(&event.id),
            market_id: market.id.expect("fetched market has id"),
            wallet_id: wallet.id.expect("fetched wallet has id"),
            wallet_address: fill.wallet.to_string(),
            condition_id: market.condition_id.clone(),
            side: fill.side.to_string(),
            outcome,
            outcome_index,
            size: size.to_string(),
            price: price.to_string(),
            usdc_size: usdc_size.to_string(),
            trade_timestamp: timestamp,
            hours_before_resolution: hours,
            wallet_age_days: Some(wallet_age_days(wallet.first_seen_at, timestamp)),
            wallet_trade_count: Some(wallet.total_trades),
            price_extremity: Some(price_extremity(price)),
            was_correct,
            profit_loss: profit_loss.map(|p| p.to_string()),
            meta: serde_json::json!({ "source": "subgraph", "event_id": event.id }).to_string(),
        };

        let repo = TradeRepository::new(self.pool);
        match repo.insert(&record).await {
            Ok(_) => Ok(RecordOutcome::Inserted { unmapped }),
            Err(e) if e.is_unique_violation() => Ok(RecordOutcome::AlreadyIngested),
            Err(e) => Err(e.into()),
        }
    }
}

/// The maker/taker sides of a fill, from the asset-id rule: a non-zero
/// makerAssetId means the maker is selling the outcome token.
struct FillParts<'e> {
    wallet: &'e str,
    side: &'static str,
    token_id: &'e str,
    token_amount_wei: &'e str,
    usdc_amount_wei: &'e str,
}

fn classify_fill(event: &OrderFilledEvent) -> FillParts<'_> {
    if event.maker_asset_id != "0" {
        FillParts {
            wallet: &event.maker,
            side: "SELL",
            token_id: &event.maker_asset_id,
            token_amount_wei: &event.maker_amount_filled,
            usdc_amount_wei: &event.taker_amount_filled,
        }
    } else {
        FillParts {
            wallet: &event.taker,
            side: "BUY",
            token_id: &event.taker_asset_id,
            token_amount_wei: &event.taker_amount_filled,
            usdc_amount_wei: &event.maker_amount_filled,
        }
    }
}

fn minimal_market(condition_id: &str, now: i64) -> MarketRecord {
    MarketRecord {
        id: None,
        condition_id: condition_id.to_string(),
        question: String::new(),
        outcomes: "[\"Yes\",\"No\"]".into(),
        outcome_prices: None,
        end_date: None,
        resolution_date: None,
        resolved_outcome: None,
        volume: "0".into(),
        volume_24h: "0".into(),
        liquidity: "0".into(),
        category: "other".into(),
        is_event_based: false,
        is_active: true,
        meta: serde_json::json!({ "needs_metadata": true }).to_string(),
        last_synced_at: Some(now),
    }
}

fn derived_outcome(
    market: &MarketRecord,
    side: &str,
    outcome: &str,
    size: Decimal,
    price: Decimal,
    trade_timestamp: i64,
) -> (Option<bool>, Option<Decimal>, Option<f64>) {
    let Some(resolved) = &market.resolved_outcome else {
        return (None, None, None);
    };
    let hours = market
        .resolution_date
        .and_then(|rd| hours_before(rd, trade_timestamp));
    let correct = trade_was_correct(side, outcome, resolved);
    let pnl = trade_profit_loss(side, correct, size, price);
    (Some(correct), Some(pnl), hours)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
