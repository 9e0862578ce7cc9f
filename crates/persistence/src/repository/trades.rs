//! Trades repository — one row per fill, unique on transaction_hash

use crate::{DbError, DbResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub transaction_hash: String,
    pub market_id: i64,
    pub wallet_id: i64,
    pub wallet_address: String,
    pub condition_id: String,
    /// BUY or SELL
    pub side: String,
    pub outcome: String,
    pub outcome_index: i64,
    pub size: String,
    pub price: String,
    pub usdc_size: String,
    pub trade_timestamp: i64,
    pub hours_before_resolution: Option<f64>,
    pub wallet_age_days: Option<f64>,
    pub wallet_trade_count: Option<i64>,
    pub price_extremity: Option<f64>,
    pub was_correct: Option<bool>,
    pub profit_loss: Option<String>,
    pub meta: String,
}

impl TradeRecord {
    pub fn size_decimal(&self) -> Decimal {
        Decimal::from_str(&self.size).unwrap_or_default()
    }

    pub fn price_decimal(&self) -> Decimal {
        Decimal::from_str(&self.price).unwrap_or_default()
    }

    pub fn usdc_size_decimal(&self) -> Decimal {
        Decimal::from_str(&self.usdc_size).unwrap_or_default()
    }

    pub fn profit_loss_decimal(&self) -> Option<Decimal> {
        self.profit_loss
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok())
    }

    pub fn is_buy(&self) -> bool {
        self.side.eq_ignore_ascii_case("BUY")
    }
}

/// Outcome of a trade upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeUpsert {
    Inserted(i64),
    Updated(i64),
}

impl TradeUpsert {
    pub fn id(&self) -> i64 {
        match self {
            Self::Inserted(id) | Self::Updated(id) => *id,
        }
    }
}

pub struct TradeRepository<'a> {
    pool: &'a SqlitePool,
}

const TRADE_COLUMNS: &str = "id, transaction_hash, market_id, wallet_id, wallet_address, \
     condition_id, side, outcome, outcome_index, size, price, usdc_size, trade_timestamp, \
     hours_before_resolution, wallet_age_days, wallet_trade_count, price_extremity, \
     was_correct, profit_loss, meta";

impl<'a> TradeRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert keyed by transaction_hash. Re-ingesting the same event updates
    /// only the derived-metric columns; core fill fields are append-only.
    pub async fn upsert(&self, record: &TradeRecord) -> DbResult<TradeUpsert> {
        if let Some(existing) = self.get_by_hash(&record.transaction_hash).await? {
            let id = existing.id.expect("fetched trade has id");
            sqlx::query(
                r#"
                UPDATE trades SET
                    hours_before_resolution = ?,
                    wallet_age_days = ?,
                    wallet_trade_count = ?,
                    price_extremity = ?,
                    was_correct = COALESCE(?, was_correct),
                    profit_loss = COALESCE(?, profit_loss)
                WHERE id = ?
                "#,
            )
            .bind(record.hours_before_resolution)
            .bind(record.wallet_age_days)
            .bind(record.wallet_trade_count)
            .bind(record.price_extremity)
            .bind(record.was_correct)
            .bind(&record.profit_loss)
            .bind(id)
            .execute(self.pool)
            .await?;
            return Ok(TradeUpsert::Updated(id));
        }

        match self.insert(record).await {
            Ok(id) => Ok(TradeUpsert::Inserted(id)),
            Err(e) if e.is_unique_violation() => {
                // Concurrent insert won the race; treat as already ingested
                let existing = self
                    .get_by_hash(&record.transaction_hash)
                    .await?
                    .ok_or_else(|| DbError::Query("trade vanished after conflict".into()))?;
                Ok(TradeUpsert::Updated(existing.id.expect("fetched trade has id")))
            }
            Err(e) => Err(e),
        }
    }

    /// Plain insert; fails with a unique violation if the hash exists.
    pub async fn insert(&self, record: &TradeRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                transaction_hash, market_id, wallet_id, wallet_address, condition_id,
                side, outcome, outcome_index, size, price, usdc_size, trade_timestamp,
                hours_before_resolution, wallet_age_days, wallet_trade_count,
                price_extremity, was_correct, profit_loss, meta
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.transaction_hash)
        .bind(record.market_id)
        .bind(record.wallet_id)
        .bind(&record.wallet_address)
        .bind(&record.condition_id)
        .bind(&record.side)
        .bind(&record.outcome)
        .bind(record.outcome_index)
        .bind(&record.size)
        .bind(&record.price)
        .bind(&record.usdc_size)
        .bind(record.trade_timestamp)
        .bind(record.hours_before_resolution)
        .bind(record.wallet_age_days)
        .bind(record.wallet_trade_count)
        .bind(record.price_extremity)
        .bind(record.was_correct)
        .bind(&record.profit_loss)
        .bind(&record.meta)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<TradeRecord>> {
        let record = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn get_by_hash(&self, transaction_hash: &str) -> DbResult<Option<TradeRecord>> {
        let record = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE transaction_hash = ?"
        ))
        .bind(transaction_hash)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    /// All trades for one wallet on one market (position-concentration input)
    pub async fn for_wallet_on_market(
        &self,
        wallet_address: &str,
        market_id: i64,
    ) -> DbResult<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE wallet_address = ? AND market_id = ? \
             ORDER BY trade_timestamp"
        ))
        .bind(wallet_address)
        .bind(market_id)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn for_wallet(&self, wallet_address: &str, limit: i64) -> DbResult<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE wallet_address = ? \
             ORDER BY trade_timestamp DESC LIMIT ?"
        ))
        .bind(wallet_address)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn for_market(&self, market_id: i64) -> DbResult<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE market_id = ? ORDER BY trade_timestamp"
        ))
        .bind(market_id)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Trades newer than the cursor, oldest first (monitor polling)
    pub async fn newer_than(&self, timestamp: i64, limit: i64) -> DbResult<Vec<TradeRecord>> {
        let records = sqlx::query_as::<_, TradeRecord>(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE trade_timestamp > ? \
             ORDER BY trade_timestamp ASC LIMIT ?"
        ))
        .bind(timestamp)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Write outcome labels after a market resolves
    pub async fn update_outcome(
        &self,
        id: i64,
        was_correct: bool,
        profit_loss: &str,
        hours_before_resolution: f64,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE trades SET was_correct = ?, profit_loss = ?, hours_before_resolution = ? \
             WHERE id = ?",
        )
        .bind(was_correct)
        .bind(profit_loss)
        .bind(hours_before_resolution)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Trade ids with no score row yet
    pub async fn unscored_ids(&self, limit: i64) -> DbResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT t.id FROM trades t LEFT JOIN trade_scores s ON s.trade_id = t.id \
             WHERE s.id IS NULL ORDER BY t.id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// A batch of all trade ids, ordered, for full re-scoring passes
    pub async fn ids_page(&self, offset: i64, limit: i64) -> DbResult<Vec<i64>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM trades ORDER BY id LIMIT ? OFFSET ?")
                .bind(limit)
                .bind(offset)
                .fetch_all(self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }

    /// Newest trade timestamp, if any trades exist
    pub async fn latest_timestamp(&self) -> DbResult<Option<i64>> {
        let (ts,): (Option<i64>,) = sqlx::query_as("SELECT MAX(trade_timestamp) FROM trades")
            .fetch_one(self.pool)
            .await?;
        Ok(ts)
    }

    pub async fn count_for_market(&self, market_id: i64) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trades WHERE market_id = ?")
            .bind(market_id)
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}
