//! Markets repository — canonical market records and token_-prefixed stubs

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Prefix used for the synthetic condition_id of a stub market
pub const STUB_CONDITION_PREFIX: &str = "token_";

/// A market row. Money columns are Decimal strings, timestamps unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketRecord {
    pub id: Option<i64>,
    pub condition_id: String,
    pub question: String,
    /// JSON list of outcome labels, e.g. `["Yes","No"]`
    pub outcomes: String,
    /// JSON list of outcome prices as strings, canonical native-list form
    pub outcome_prices: Option<String>,
    pub end_date: Option<i64>,
    pub resolution_date: Option<i64>,
    pub resolved_outcome: Option<String>,
    pub volume: String,
    pub volume_24h: String,
    pub liquidity: String,
    pub category: String,
    pub is_event_based: bool,
    pub is_active: bool,
    /// Opaque key/value bag; holds `clobTokenIds` and `needs_metadata`
    pub meta: String,
    pub last_synced_at: Option<i64>,
}

impl MarketRecord {
    pub fn is_stub(&self) -> bool {
        self.condition_id.starts_with(STUB_CONDITION_PREFIX)
    }

    pub fn outcome_labels(&self) -> Vec<String> {
        serde_json::from_str(&self.outcomes).unwrap_or_default()
    }

    pub fn meta_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.meta).unwrap_or(serde_json::Value::Null)
    }
}

pub struct MarketRepository<'a> {
    pool: &'a SqlitePool,
}

const MARKET_COLUMNS: &str = "id, condition_id, question, outcomes, outcome_prices, end_date, \
     resolution_date, resolved_outcome, volume, volume_24h, liquidity, category, \
     is_event_based, is_active, meta, last_synced_at";

impl<'a> MarketRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a market keyed by condition_id. Returns the row id.
    ///
    /// A resolved_outcome already on the row is never overwritten: resolution
    /// is immutable once set.
    pub async fn upsert(&self, record: &MarketRecord) -> DbResult<i64> {
        sqlx::query(
            r#"
            INSERT INTO markets (
                condition_id, question, outcomes, outcome_prices, end_date,
                resolution_date, resolved_outcome, volume, volume_24h, liquidity,
                category, is_event_based, is_active, meta, last_synced_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(condition_id) DO UPDATE SET
                question = excluded.question,
                outcomes = excluded.outcomes,
                outcome_prices = excluded.outcome_prices,
                end_date = excluded.end_date,
                resolution_date = COALESCE(markets.resolution_date, excluded.resolution_date),
                resolved_outcome = COALESCE(markets.resolved_outcome, excluded.resolved_outcome),
                volume = excluded.volume,
                volume_24h = excluded.volume_24h,
                liquidity = excluded.liquidity,
                category = excluded.category,
                is_event_based = excluded.is_event_based,
                is_active = excluded.is_active,
                meta = excluded.meta,
                last_synced_at = excluded.last_synced_at
            "#,
        )
        .bind(&record.condition_id)
        .bind(&record.question)
        .bind(&record.outcomes)
        .bind(&record.outcome_prices)
        .bind(record.end_date)
        .bind(record.resolution_date)
        .bind(&record.resolved_outcome)
        .bind(&record.volume)
        .bind(&record.volume_24h)
        .bind(&record.liquidity)
        .bind(&record.category)
        .bind(record.is_event_based)
        .bind(record.is_active)
        .bind(&record.meta)
        .bind(record.last_synced_at)
        .execute(self.pool)
        .await?;

        // The upsert may have updated an existing row; re-read for the id
        let (id,): (i64,) = sqlx::query_as("SELECT id FROM markets WHERE condition_id = ?")
            .bind(&record.condition_id)
            .fetch_one(self.pool)
            .await?;
        Ok(id)
    }

    /// Insert a stub market for an unresolvable token id.
    /// On a concurrent-insert conflict the existing row is re-read.
    pub async fn insert_stub(&self, token_id: &str, now: i64) -> DbResult<MarketRecord> {
        let truncated: String = token_id.chars().take(32).collect();
        let condition_id = format!("{STUB_CONDITION_PREFIX}{truncated}");
        let meta = serde_json::json!({
            "needs_metadata": true,
            "source_token_id": token_id,
        })
        .to_string();

        let result = sqlx::query(
            r#"
            INSERT INTO markets (condition_id, question, outcomes, category, is_active, meta, last_synced_at)
            VALUES (?, ?, '["Yes","No"]', 'other', 1, ?, ?)
            "#,
        )
        .bind(&condition_id)
        .bind(format!("Unknown market (token {truncated})"))
        .bind(&meta)
        .bind(now)
        .execute(self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(e) => {
                let err = DbError::from(e);
                if !err.is_unique_violation() {
                    return Err(err);
                }
                // Raced with another inserter; fall through to the re-read
            }
        }

        self.get_by_condition_id(&condition_id)
            .await?
            .ok_or_else(|| DbError::Query(format!("stub {condition_id} vanished after insert")))
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<MarketRecord>> {
        let record = sqlx::query_as::<_, MarketRecord>(&format!(
            "SELECT {MARKET_COLUMNS} FROM markets WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn get_by_condition_id(&self, condition_id: &str) -> DbResult<Option<MarketRecord>> {
        let record = sqlx::query_as::<_, MarketRecord>(&format!(
            "SELECT {MARKET_COLUMNS} FROM markets WHERE condition_id = ?"
        ))
        .bind(condition_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    /// All markets, optionally restricted to active ones
    pub async fn list(&self, include_inactive: bool) -> DbResult<Vec<MarketRecord>> {
        let sql = if include_inactive {
            format!("SELECT {MARKET_COLUMNS} FROM markets")
        } else {
            format!("SELECT {MARKET_COLUMNS} FROM markets WHERE is_active = 1")
        };
        let records = sqlx::query_as::<_, MarketRecord>(&sql)
            .fetch_all(self.pool)
            .await?;
        Ok(records)
    }

    /// Stub markets still waiting for metadata enrichment
    pub async fn list_stubs(&self) -> DbResult<Vec<MarketRecord>> {
        let records = sqlx::query_as::<_, MarketRecord>(&format!(
            "SELECT {MARKET_COLUMNS} FROM markets WHERE condition_id LIKE 'token\\_%' ESCAPE '\\'"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Record a market resolution. No-op if a resolution is already set.
    /// Returns true when the row was actually updated.
    pub async fn set_resolution(
        &self,
        id: i64,
        resolved_outcome: &str,
        resolution_date: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE markets
            SET resolved_outcome = ?, resolution_date = ?
            WHERE id = ? AND resolved_outcome IS NULL
            "#,
        )
        .bind(resolved_outcome)
        .bind(resolution_date)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Rewrite a stub's condition_id to the canonical value.
    /// Returns false if the canonical condition_id already exists (unique
    /// conflict) — the caller should merge into that row instead.
    pub async fn rewrite_condition_id(&self, id: i64, condition_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE markets SET condition_id = ?, meta = json_remove(meta, '$.needs_metadata') WHERE id = ?",
        )
        .bind(condition_id)
        .bind(id)
        .execute(self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = DbError::from(e);
                if err.is_unique_violation() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Merge a stub into a canonical market: re-parent all of the stub's
    /// trades and delete the stub, in one transaction.
    /// Returns the number of trades moved.
    pub async fn merge_stub(
        &self,
        stub_id: i64,
        canonical_id: i64,
        canonical_condition_id: &str,
    ) -> DbResult<u64> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            "UPDATE trades SET market_id = ?, condition_id = ? WHERE market_id = ?",
        )
        .bind(canonical_id)
        .bind(canonical_condition_id)
        .bind(stub_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query("UPDATE investigation_candidates SET market_id = ?, condition_id = ? WHERE market_id = ?")
            .bind(canonical_id)
            .bind(canonical_condition_id)
            .bind(stub_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM markets WHERE id = ?")
            .bind(stub_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(moved)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM markets")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}
