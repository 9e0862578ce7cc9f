//! Trade scores repository — one score row per trade, replaced in place

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeScoreRecord {
    pub id: Option<i64>,
    pub trade_id: i64,
    pub size_zscore: Option<f64>,
    pub timing_zscore: Option<f64>,
    pub wallet_age_zscore: Option<f64>,
    pub wallet_activity_zscore: Option<f64>,
    pub price_extremity_zscore: Option<f64>,
    pub position_concentration_zscore: Option<f64>,
    pub funding_proximity_zscore: Option<f64>,
    pub anomaly_score: f64,
    pub insider_probability: f64,
    pub trinity_pattern: bool,
    /// JSON map pattern_name -> score
    pub matched_patterns: String,
    /// JSON map metric -> { zscore, severity }
    pub score_breakdown: String,
    pub scored_at: i64,
    pub score_mode: Option<String>,
}

/// Scored trade joined with its trade/market context, as discovery consumes it
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ScoredTradeRow {
    pub trade_id: i64,
    pub score_id: i64,
    pub anomaly_score: f64,
    pub insider_probability: f64,
    pub score_breakdown: String,
    pub market_id: i64,
    pub condition_id: String,
    pub question: String,
    pub wallet_address: String,
    pub side: String,
    pub outcome: String,
    pub size: String,
    pub price: String,
    pub usdc_size: String,
    pub profit_loss: Option<String>,
    pub hours_before_resolution: Option<f64>,
}

/// Minimal row for pattern validation
#[derive(Debug, Clone, FromRow)]
pub struct ValidationRow {
    pub trade_id: i64,
    pub matched_patterns: String,
}

pub struct ScoreRepository<'a> {
    pool: &'a SqlitePool,
}

const SCORE_COLUMNS: &str = "id, trade_id, size_zscore, timing_zscore, wallet_age_zscore, \
     wallet_activity_zscore, price_extremity_zscore, position_concentration_zscore, \
     funding_proximity_zscore, anomaly_score, insider_probability, trinity_pattern, \
     matched_patterns, score_breakdown, scored_at, score_mode";

impl<'a> ScoreRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert keyed by trade_id — re-scoring replaces the row in place
    pub async fn upsert(&self, record: &TradeScoreRecord) -> DbResult<i64> {
        sqlx::query(
            r#"
            INSERT INTO trade_scores (
                trade_id, size_zscore, timing_zscore, wallet_age_zscore,
                wallet_activity_zscore, price_extremity_zscore,
                position_concentration_zscore, funding_proximity_zscore,
                anomaly_score, insider_probability, trinity_pattern,
                matched_patterns, score_breakdown, scored_at, score_mode
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(trade_id) DO UPDATE SET
                size_zscore = excluded.size_zscore,
                timing_zscore = excluded.timing_zscore,
                wallet_age_zscore = excluded.wallet_age_zscore,
                wallet_activity_zscore = excluded.wallet_activity_zscore,
                price_extremity_zscore = excluded.price_extremity_zscore,
                position_concentration_zscore = excluded.position_concentration_zscore,
                funding_proximity_zscore = excluded.funding_proximity_zscore,
                anomaly_score = excluded.anomaly_score,
                insider_probability = excluded.insider_probability,
                trinity_pattern = excluded.trinity_pattern,
                matched_patterns = excluded.matched_patterns,
                score_breakdown = excluded.score_breakdown,
                scored_at = excluded.scored_at,
                score_mode = excluded.score_mode
            "#,
        )
        .bind(record.trade_id)
        .bind(record.size_zscore)
        .bind(record.timing_zscore)
        .bind(record.wallet_age_zscore)
        .bind(record.wallet_activity_zscore)
        .bind(record.price_extremity_zscore)
        .bind(record.position_concentration_zscore)
        .bind(record.funding_proximity_zscore)
        .bind(record.anomaly_score)
        .bind(record.insider_probability)
        .bind(record.trinity_pattern)
        .bind(&record.matched_patterns)
        .bind(&record.score_breakdown)
        .bind(record.scored_at)
        .bind(&record.score_mode)
        .execute(self.pool)
        .await?;

        let (id,): (i64,) = sqlx::query_as("SELECT id FROM trade_scores WHERE trade_id = ?")
            .bind(record.trade_id)
            .fetch_one(self.pool)
            .await?;
        Ok(id)
    }

    pub async fn get_by_trade(&self, trade_id: i64) -> DbResult<Option<TradeScoreRecord>> {
        let record = sqlx::query_as::<_, TradeScoreRecord>(&format!(
            "SELECT {SCORE_COLUMNS} FROM trade_scores WHERE trade_id = ?"
        ))
        .bind(trade_id)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    /// Scored trades passing the discovery thresholds, knowns excluded,
    /// ordered by (probability desc, anomaly desc).
    pub async fn discovery_rows(
        &self,
        min_probability: f64,
        min_anomaly: f64,
        min_profit: Option<f64>,
        limit: i64,
    ) -> DbResult<Vec<ScoredTradeRow>> {
        let mut sql = String::from(
            r#"
            SELECT s.trade_id, s.id AS score_id, s.anomaly_score, s.insider_probability,
                   s.score_breakdown, t.market_id, t.condition_id, m.question,
                   t.wallet_address, t.side, t.outcome, t.size, t.price, t.usdc_size,
                   t.profit_loss, t.hours_before_resolution
            FROM trade_scores s
            JOIN trades t ON t.id = s.trade_id
            JOIN markets m ON m.id = t.market_id
            WHERE s.insider_probability >= ?
              AND s.anomaly_score >= ?
              AND t.was_correct = 1
              AND m.is_event_based = 1
              AND t.id NOT IN (SELECT trade_id FROM confirmed_insiders WHERE trade_id IS NOT NULL)
              AND t.id NOT IN (SELECT trade_id FROM investigation_candidates)
            "#,
        );
        if min_profit.is_some() {
            sql.push_str(" AND CAST(t.profit_loss AS REAL) >= ?");
        }
        sql.push_str(" ORDER BY s.insider_probability DESC, s.anomaly_score DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, ScoredTradeRow>(&sql)
            .bind(min_probability)
            .bind(min_anomaly);
        if let Some(mp) = min_profit {
            query = query.bind(mp);
        }
        let rows = query.bind(limit).fetch_all(self.pool).await?;
        Ok(rows)
    }

    /// Other suspicious scored trades on one market (investigation context)
    pub async fn suspicious_for_market(
        &self,
        market_id: i64,
        min_probability: f64,
        exclude_trade: i64,
        limit: i64,
    ) -> DbResult<Vec<ScoredTradeRow>> {
        let rows = sqlx::query_as::<_, ScoredTradeRow>(
            r#"
            SELECT s.trade_id, s.id AS score_id, s.anomaly_score, s.insider_probability,
                   s.score_breakdown, t.market_id, t.condition_id, m.question,
                   t.wallet_address, t.side, t.outcome, t.size, t.price, t.usdc_size,
                   t.profit_loss, t.hours_before_resolution
            FROM trade_scores s
            JOIN trades t ON t.id = s.trade_id
            JOIN markets m ON m.id = t.market_id
            WHERE t.market_id = ? AND s.insider_probability >= ? AND s.trade_id != ?
            ORDER BY s.insider_probability DESC
            LIMIT ?
            "#,
        )
        .bind(market_id)
        .bind(min_probability)
        .bind(exclude_trade)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    /// Count of scored trades passing thresholds before exclusions (batch stats)
    pub async fn count_above(&self, min_probability: f64, min_anomaly: f64) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM trade_scores WHERE insider_probability >= ? AND anomaly_score >= ?",
        )
        .bind(min_probability)
        .bind(min_anomaly)
        .fetch_one(self.pool)
        .await?;
        Ok(n)
    }

    /// Every score's matched-pattern map, for pattern validation
    pub async fn validation_rows(&self) -> DbResult<Vec<ValidationRow>> {
        let rows = sqlx::query_as::<_, ValidationRow>(
            "SELECT trade_id, matched_patterns FROM trade_scores",
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM trade_scores")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}
