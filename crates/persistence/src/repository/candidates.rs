//! Investigation candidates and discovery batches

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CandidateRecord {
    pub id: Option<i64>,
    pub trade_id: i64,
    pub score_id: Option<i64>,
    pub market_id: Option<i64>,
    pub batch_id: Option<String>,
    pub discovery_rank: Option<i64>,
    pub anomaly_score: f64,
    pub insider_probability: f64,
    pub wallet_address: String,
    pub condition_id: String,
    pub question: String,
    pub side: String,
    pub outcome: String,
    pub size: String,
    pub price: String,
    pub usdc_size: String,
    pub profit_loss: Option<String>,
    pub hours_before_resolution: Option<f64>,
    pub anomaly_breakdown: String,
    /// undiscovered | investigating | resolved | dismissed
    pub status: String,
    /// critical | high | medium | low
    pub priority: String,
    pub resolution: Option<String>,
    /// JSON list of {at, author, text}
    pub notes: String,
    /// JSON list of evidence strings
    pub evidence: String,
    pub discovered_at: i64,
    pub resolved_at: Option<i64>,
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DiscoveryBatchRecord {
    pub id: Option<i64>,
    pub batch_id: String,
    pub min_anomaly_score: f64,
    pub min_insider_probability: f64,
    pub min_profit: Option<String>,
    pub limit_requested: i64,
    pub trades_examined: i64,
    pub candidates_created: i64,
    pub top_score: Option<f64>,
    pub median_score: Option<f64>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub notes: Option<String>,
}

pub struct CandidateRepository<'a> {
    pool: &'a SqlitePool,
}

const CANDIDATE_COLUMNS: &str = "id, trade_id, score_id, market_id, batch_id, discovery_rank, \
     anomaly_score, insider_probability, wallet_address, condition_id, question, side, outcome, \
     size, price, usdc_size, profit_loss, hours_before_resolution, anomaly_breakdown, status, \
     priority, resolution, notes, evidence, discovered_at, resolved_at, assigned_to";

impl<'a> CandidateRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a candidate; a trade already promoted is left untouched.
    /// Returns the id, or None if the trade was already a candidate.
    pub async fn insert(&self, record: &CandidateRecord) -> DbResult<Option<i64>> {
        let result = sqlx::query(
            r#"
            INSERT INTO investigation_candidates (
                trade_id, score_id, market_id, batch_id, discovery_rank,
                anomaly_score, insider_probability, wallet_address, condition_id,
                question, side, outcome, size, price, usdc_size, profit_loss,
                hours_before_resolution, anomaly_breakdown, status, priority,
                notes, evidence, discovered_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.trade_id)
        .bind(record.score_id)
        .bind(record.market_id)
        .bind(&record.batch_id)
        .bind(record.discovery_rank)
        .bind(record.anomaly_score)
        .bind(record.insider_probability)
        .bind(&record.wallet_address)
        .bind(&record.condition_id)
        .bind(&record.question)
        .bind(&record.side)
        .bind(&record.outcome)
        .bind(&record.size)
        .bind(&record.price)
        .bind(&record.usdc_size)
        .bind(&record.profit_loss)
        .bind(record.hours_before_resolution)
        .bind(&record.anomaly_breakdown)
        .bind(&record.status)
        .bind(&record.priority)
        .bind(&record.notes)
        .bind(&record.evidence)
        .bind(record.discovered_at)
        .execute(self.pool)
        .await;

        match result {
            Ok(r) => Ok(Some(r.last_insert_rowid())),
            Err(e) => {
                let err = DbError::from(e);
                if err.is_unique_violation() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    pub async fn get(&self, id: i64) -> DbResult<Option<CandidateRecord>> {
        let record = sqlx::query_as::<_, CandidateRecord>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM investigation_candidates WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn get_by_trade(&self, trade_id: i64) -> DbResult<Option<CandidateRecord>> {
        let record = sqlx::query_as::<_, CandidateRecord>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM investigation_candidates WHERE trade_id = ?"
        ))
        .bind(trade_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn list(&self, status: Option<&str>, limit: i64) -> DbResult<Vec<CandidateRecord>> {
        let records = if let Some(status) = status {
            sqlx::query_as::<_, CandidateRecord>(&format!(
                "SELECT {CANDIDATE_COLUMNS} FROM investigation_candidates WHERE status = ? \
                 ORDER BY insider_probability DESC LIMIT ?"
            ))
            .bind(status)
            .bind(limit)
            .fetch_all(self.pool)
            .await?
        } else {
            sqlx::query_as::<_, CandidateRecord>(&format!(
                "SELECT {CANDIDATE_COLUMNS} FROM investigation_candidates \
                 ORDER BY insider_probability DESC LIMIT ?"
            ))
            .bind(limit)
            .fetch_all(self.pool)
            .await?
        };
        Ok(records)
    }

    /// Same wallet or same market, excluding the candidate itself
    pub async fn similar(
        &self,
        wallet_address: &str,
        market_id: Option<i64>,
        exclude_id: i64,
    ) -> DbResult<Vec<CandidateRecord>> {
        let records = sqlx::query_as::<_, CandidateRecord>(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM investigation_candidates \
             WHERE (wallet_address = ? OR market_id = ?) AND id != ? \
             ORDER BY insider_probability DESC LIMIT 20"
        ))
        .bind(wallet_address)
        .bind(market_id)
        .bind(exclude_id)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn update_status(
        &self,
        id: i64,
        status: &str,
        resolution: Option<&str>,
        resolved_at: Option<i64>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE investigation_candidates SET status = ?, resolution = COALESCE(?, resolution), \
             resolved_at = COALESCE(?, resolved_at) WHERE id = ?",
        )
        .bind(status)
        .bind(resolution)
        .bind(resolved_at)
        .bind(id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn assign(&self, id: i64, assignee: &str) -> DbResult<()> {
        sqlx::query("UPDATE investigation_candidates SET assigned_to = ? WHERE id = ?")
            .bind(assignee)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_notes(&self, id: i64, notes_json: &str) -> DbResult<()> {
        sqlx::query("UPDATE investigation_candidates SET notes = ? WHERE id = ?")
            .bind(notes_json)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_evidence(&self, id: i64, evidence_json: &str) -> DbResult<()> {
        sqlx::query("UPDATE investigation_candidates SET evidence = ? WHERE id = ?")
            .bind(evidence_json)
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM investigation_candidates")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Discovery batches
// ---------------------------------------------------------------------------

pub struct BatchRepository<'a> {
    pool: &'a SqlitePool,
}

const BATCH_COLUMNS: &str = "id, batch_id, min_anomaly_score, min_insider_probability, \
     min_profit, limit_requested, trades_examined, candidates_created, top_score, median_score, \
     started_at, completed_at, notes";

impl<'a> BatchRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_started(&self, record: &DiscoveryBatchRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO discovery_batches (
                batch_id, min_anomaly_score, min_insider_probability, min_profit,
                limit_requested, started_at, notes
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.batch_id)
        .bind(record.min_anomaly_score)
        .bind(record.min_insider_probability)
        .bind(&record.min_profit)
        .bind(record.limit_requested)
        .bind(record.started_at)
        .bind(&record.notes)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn complete(
        &self,
        batch_id: &str,
        trades_examined: i64,
        candidates_created: i64,
        top_score: Option<f64>,
        median_score: Option<f64>,
        completed_at: i64,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE discovery_batches SET
                trades_examined = ?,
                candidates_created = ?,
                top_score = ?,
                median_score = ?,
                completed_at = ?
            WHERE batch_id = ?
            "#,
        )
        .bind(trades_examined)
        .bind(candidates_created)
        .bind(top_score)
        .bind(median_score)
        .bind(completed_at)
        .bind(batch_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, batch_id: &str) -> DbResult<Option<DiscoveryBatchRecord>> {
        let record = sqlx::query_as::<_, DiscoveryBatchRecord>(&format!(
            "SELECT {BATCH_COLUMNS} FROM discovery_batches WHERE batch_id = ?"
        ))
        .bind(batch_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }
}
