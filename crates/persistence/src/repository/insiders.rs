//! Confirmed insiders repository — labeled truth cases

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConfirmedInsiderRecord {
    pub id: Option<i64>,
    pub wallet_address: String,
    pub condition_id: Option<String>,
    pub trade_id: Option<i64>,
    /// suspected | likely | confirmed
    pub confidence_level: String,
    pub confirmation_source: Option<String>,
    /// JSON list of evidence strings
    pub evidence: String,
    pub used_for_training: bool,
    pub training_weight: f64,
}

pub struct InsiderRepository<'a> {
    pool: &'a SqlitePool,
}

const INSIDER_COLUMNS: &str = "id, wallet_address, condition_id, trade_id, confidence_level, \
     confirmation_source, evidence, used_for_training, training_weight";

impl<'a> InsiderRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &ConfirmedInsiderRecord) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO confirmed_insiders (
                wallet_address, condition_id, trade_id, confidence_level,
                confirmation_source, evidence, used_for_training, training_weight
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.wallet_address)
        .bind(&record.condition_id)
        .bind(record.trade_id)
        .bind(&record.confidence_level)
        .bind(&record.confirmation_source)
        .bind(&record.evidence)
        .bind(record.used_for_training)
        .bind(record.training_weight)
        .execute(self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn all(&self) -> DbResult<Vec<ConfirmedInsiderRecord>> {
        let records = sqlx::query_as::<_, ConfirmedInsiderRecord>(&format!(
            "SELECT {INSIDER_COLUMNS} FROM confirmed_insiders ORDER BY id"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Rows not yet folded into the insider baselines
    pub async fn untrained(&self) -> DbResult<Vec<ConfirmedInsiderRecord>> {
        let records = sqlx::query_as::<_, ConfirmedInsiderRecord>(&format!(
            "SELECT {INSIDER_COLUMNS} FROM confirmed_insiders WHERE used_for_training = 0"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn mark_used_for_training(&self, ids: &[i64]) -> DbResult<u64> {
        let mut marked = 0u64;
        for id in ids {
            let result =
                sqlx::query("UPDATE confirmed_insiders SET used_for_training = 1 WHERE id = ?")
                    .bind(id)
                    .execute(self.pool)
                    .await?;
            marked += result.rows_affected();
        }
        Ok(marked)
    }

    /// Trade ids directly linked to a confirmed insider (validation labels)
    pub async fn labeled_trade_ids(&self) -> DbResult<HashSet<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT DISTINCT trade_id FROM confirmed_insiders WHERE trade_id IS NOT NULL",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM confirmed_insiders")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }

    pub async fn count_trained(&self) -> DbResult<i64> {
        let (n,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM confirmed_insiders WHERE used_for_training = 1")
                .fetch_one(self.pool)
                .await?;
        Ok(n)
    }
}
