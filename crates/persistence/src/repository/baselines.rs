//! Baselines repository — per (category, metric) distributions
//!
//! Also owns the metric-value extraction queries the baseline engine feeds
//! on: metric names map to a fixed set of SQL expressions, never
//! interpolated from caller input.

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BaselineRecord {
    pub id: Option<i64>,
    pub category: String,
    pub metric: String,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_count: i64,
    pub insider_mean: Option<f64>,
    pub insider_std_dev: Option<f64>,
    pub insider_sample_count: i64,
    pub separation_score: Option<f64>,
    pub calculated_at: i64,
}

/// Normal-distribution half of a baseline row
#[derive(Debug, Clone, Copy)]
pub struct NormalStats {
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_count: i64,
}

fn metric_expr(metric: &str) -> DbResult<&'static str> {
    Ok(match metric {
        "size" => "CAST(t.size AS REAL)",
        "usdc_size" => "CAST(t.usdc_size AS REAL)",
        "timing" => "t.hours_before_resolution",
        "wallet_age" => "t.wallet_age_days",
        "wallet_activity" => "CAST(t.wallet_trade_count AS REAL)",
        "price_extremity" => "t.price_extremity",
        other => return Err(DbError::Query(format!("unknown baseline metric: {other}"))),
    })
}

pub struct BaselineRepository<'a> {
    pool: &'a SqlitePool,
}

const BASELINE_COLUMNS: &str = "id, category, metric, mean, std_dev, median, p75, p90, p95, p99, \
     sample_count, insider_mean, insider_std_dev, insider_sample_count, separation_score, \
     calculated_at";

impl<'a> BaselineRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Metric values from trades on resolved markets, optionally filtered to
    /// one market category. `None` category means the 'all' pseudo-category.
    pub async fn metric_values(
        &self,
        metric: &str,
        category: Option<&str>,
    ) -> DbResult<Vec<f64>> {
        let expr = metric_expr(metric)?;
        let base = format!(
            "SELECT {expr} FROM trades t JOIN markets m ON m.id = t.market_id \
             WHERE m.resolved_outcome IS NOT NULL AND {expr} IS NOT NULL"
        );

        let rows: Vec<(f64,)> = if let Some(cat) = category {
            sqlx::query_as(&format!("{base} AND m.category = ?"))
                .bind(cat)
                .fetch_all(self.pool)
                .await?
        } else {
            sqlx::query_as(&base).fetch_all(self.pool).await?
        };

        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    /// Metric values restricted to trades linked from confirmed insiders:
    /// either directly by trade_id, or any trade by a confirmed wallet.
    pub async fn insider_metric_values(&self, metric: &str) -> DbResult<Vec<f64>> {
        let expr = metric_expr(metric)?;
        let sql = format!(
            "SELECT {expr} FROM trades t JOIN markets m ON m.id = t.market_id \
             WHERE m.resolved_outcome IS NOT NULL AND {expr} IS NOT NULL \
             AND (t.id IN (SELECT trade_id FROM confirmed_insiders WHERE trade_id IS NOT NULL) \
                  OR t.wallet_address IN (SELECT wallet_address FROM confirmed_insiders))"
        );
        let rows: Vec<(f64,)> = sqlx::query_as(&sql).fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(|(v,)| v).collect())
    }

    /// Upsert the normal-distribution side of a (category, metric) row,
    /// preserving any insider columns already present.
    pub async fn upsert_normal(
        &self,
        category: &str,
        metric: &str,
        stats: &NormalStats,
        calculated_at: i64,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO baselines (
                category, metric, mean, std_dev, median, p75, p90, p95, p99,
                sample_count, calculated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(category, metric) DO UPDATE SET
                mean = excluded.mean,
                std_dev = excluded.std_dev,
                median = excluded.median,
                p75 = excluded.p75,
                p90 = excluded.p90,
                p95 = excluded.p95,
                p99 = excluded.p99,
                sample_count = excluded.sample_count,
                calculated_at = excluded.calculated_at
            "#,
        )
        .bind(category)
        .bind(metric)
        .bind(stats.mean)
        .bind(stats.std_dev)
        .bind(stats.median)
        .bind(stats.p75)
        .bind(stats.p90)
        .bind(stats.p95)
        .bind(stats.p99)
        .bind(stats.sample_count)
        .bind(calculated_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Write the insider distribution and separation score onto the
    /// ('all', metric) row. The row must already exist (normal pass first).
    pub async fn update_insider(
        &self,
        metric: &str,
        insider_mean: f64,
        insider_std_dev: f64,
        insider_sample_count: i64,
        separation_score: Option<f64>,
        calculated_at: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE baselines SET
                insider_mean = ?,
                insider_std_dev = ?,
                insider_sample_count = ?,
                separation_score = ?,
                calculated_at = ?
            WHERE category = 'all' AND metric = ?
            "#,
        )
        .bind(insider_mean)
        .bind(insider_std_dev)
        .bind(insider_sample_count)
        .bind(separation_score)
        .bind(calculated_at)
        .bind(metric)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, category: &str, metric: &str) -> DbResult<Option<BaselineRecord>> {
        let record = sqlx::query_as::<_, BaselineRecord>(&format!(
            "SELECT {BASELINE_COLUMNS} FROM baselines WHERE category = ? AND metric = ?"
        ))
        .bind(category)
        .bind(metric)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    pub async fn all(&self) -> DbResult<Vec<BaselineRecord>> {
        let records = sqlx::query_as::<_, BaselineRecord>(&format!(
            "SELECT {BASELINE_COLUMNS} FROM baselines ORDER BY category, metric"
        ))
        .fetch_all(self.pool)
        .await?;
        Ok(records)
    }

    /// Mean separation score across metrics that have one (feedback deltas)
    pub async fn avg_separation(&self) -> DbResult<Option<f64>> {
        let (avg,): (Option<f64>,) =
            sqlx::query_as("SELECT AVG(separation_score) FROM baselines WHERE separation_score IS NOT NULL")
                .fetch_one(self.pool)
                .await?;
        Ok(avg)
    }

    /// Total insider samples across ('all', metric) rows (feedback deltas)
    pub async fn total_insider_samples(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(insider_sample_count), 0) FROM baselines WHERE category = 'all'",
        )
        .fetch_one(self.pool)
        .await?;
        Ok(n)
    }
}
