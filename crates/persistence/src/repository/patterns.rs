//! Patterns repository — named rule sets with running validation stats

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PatternRecord {
    pub id: Option<i64>,
    pub pattern_name: String,
    pub description: String,
    /// JSON rule set: {"rules": [...], "logic": "AND"|"OR", "min_matches": n}
    pub conditions: String,
    pub alert_threshold: f64,
    pub true_positives: i64,
    pub false_positives: i64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub lift: Option<f64>,
    pub is_active: bool,
    pub validated_at: Option<i64>,
}

/// Validation counters written back after a validation pass
#[derive(Debug, Clone, Copy)]
pub struct PatternValidation {
    pub true_positives: i64,
    pub false_positives: i64,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub lift: Option<f64>,
}

pub struct PatternRepository<'a> {
    pool: &'a SqlitePool,
}

const PATTERN_COLUMNS: &str = "id, pattern_name, description, conditions, alert_threshold, \
     true_positives, false_positives, precision, recall, f1_score, lift, is_active, validated_at";

impl<'a> PatternRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a pattern if its name is not taken (seeding is idempotent)
    pub async fn insert_if_missing(
        &self,
        name: &str,
        description: &str,
        conditions: &str,
        alert_threshold: f64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO patterns (pattern_name, description, conditions, alert_threshold) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(conditions)
        .bind(alert_threshold)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_by_name(&self, name: &str) -> DbResult<Option<PatternRecord>> {
        let record = sqlx::query_as::<_, PatternRecord>(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns WHERE pattern_name = ?"
        ))
        .bind(name)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn all(&self) -> DbResult<Vec<PatternRecord>> {
        let records = sqlx::query_as::<_, PatternRecord>(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns ORDER BY pattern_name"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn all_active(&self) -> DbResult<Vec<PatternRecord>> {
        let records = sqlx::query_as::<_, PatternRecord>(&format!(
            "SELECT {PATTERN_COLUMNS} FROM patterns WHERE is_active = 1 ORDER BY pattern_name"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    pub async fn update_validation(
        &self,
        name: &str,
        v: &PatternValidation,
        validated_at: i64,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE patterns SET
                true_positives = ?,
                false_positives = ?,
                precision = ?,
                recall = ?,
                f1_score = ?,
                lift = ?,
                validated_at = ?
            WHERE pattern_name = ?
            "#,
        )
        .bind(v.true_positives)
        .bind(v.false_positives)
        .bind(v.precision)
        .bind(v.recall)
        .bind(v.f1_score)
        .bind(v.lift)
        .bind(validated_at)
        .bind(name)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_active(&self, name: &str, active: bool) -> DbResult<()> {
        sqlx::query("UPDATE patterns SET is_active = ? WHERE pattern_name = ?")
            .bind(active)
            .bind(name)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Mean F1 across validated patterns (feedback deltas)
    pub async fn avg_f1(&self) -> DbResult<Option<f64>> {
        let (avg,): (Option<f64>,) =
            sqlx::query_as("SELECT AVG(f1_score) FROM patterns WHERE f1_score IS NOT NULL")
                .fetch_one(self.pool)
                .await?;
        Ok(avg)
    }
}
