//! Alerts repository — real-time notifications from the trade monitor

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AlertRecord {
    pub id: Option<i64>,
    pub alert_id: String,
    /// pattern_match | anomaly_threshold | whale_trade | timing_suspicious | combined | manual
    pub alert_type: String,
    /// low | medium | high | critical
    pub severity: String,
    /// new | acknowledged | investigating | resolved | dismissed
    pub status: String,
    pub trade_id: Option<i64>,
    pub wallet_address: Option<String>,
    pub condition_id: Option<String>,
    pub question: Option<String>,
    pub anomaly_score: Option<f64>,
    pub insider_probability: Option<f64>,
    pub matched_patterns: String,
    pub context: String,
    pub triggered_at: i64,
    pub acknowledged_at: Option<i64>,
    pub resolved_at: Option<i64>,
}

pub struct AlertRepository<'a> {
    pool: &'a SqlitePool,
}

const ALERT_COLUMNS: &str = "id, alert_id, alert_type, severity, status, trade_id, \
     wallet_address, condition_id, question, anomaly_score, insider_probability, \
     matched_patterns, context, triggered_at, acknowledged_at, resolved_at";

impl<'a> AlertRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &AlertRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (
                alert_id, alert_type, severity, status, trade_id, wallet_address,
                condition_id, question, anomaly_score, insider_probability,
                matched_patterns, context, triggered_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.alert_id)
        .bind(&record.alert_type)
        .bind(&record.severity)
        .bind(&record.status)
        .bind(record.trade_id)
        .bind(&record.wallet_address)
        .bind(&record.condition_id)
        .bind(&record.question)
        .bind(record.anomaly_score)
        .bind(record.insider_probability)
        .bind(&record.matched_patterns)
        .bind(&record.context)
        .bind(record.triggered_at)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_alert_id(&self, alert_id: &str) -> DbResult<Option<AlertRecord>> {
        let record = sqlx::query_as::<_, AlertRecord>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE alert_id = ?"
        ))
        .bind(alert_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn recent(&self, limit: i64) -> DbResult<Vec<AlertRecord>> {
        let records = sqlx::query_as::<_, AlertRecord>(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts ORDER BY triggered_at DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn update_status(
        &self,
        alert_id: &str,
        status: &str,
        acknowledged_at: Option<i64>,
        resolved_at: Option<i64>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE alerts SET status = ?, \
             acknowledged_at = COALESCE(?, acknowledged_at), \
             resolved_at = COALESCE(?, resolved_at) \
             WHERE alert_id = ?",
        )
        .bind(status)
        .bind(acknowledged_at)
        .bind(resolved_at)
        .bind(alert_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alerts")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}
