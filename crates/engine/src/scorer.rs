//! Per-trade scoring — z-score vector, anomaly score, insider probability
//!
//! Z-scores come from the category baseline with fallback to 'all'; a
//! missing baseline or input leaves the z-score null, never 0. Position
//! concentration is already a normalized ratio and converts through fixed
//! empirical parameters instead of a data-driven baseline.

use crate::baseline::{zscore, ALL_CATEGORY};
use crate::patterns::{match_patterns, metric_map};
use chrono::Utc;
use persistence::repository::{
    BaselineRecord, BaselineRepository, MarketRepository, PatternRecord, PatternRepository,
    ScoreRepository, TradeRecord, TradeRepository, TradeScoreRecord,
};
use persistence::{DbResult, SqlitePool};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Fixed weights for the weighted anomaly combination
const WEIGHT_SIZE: f64 = 0.25;
const WEIGHT_TIMING: f64 = 0.25;
const WEIGHT_WALLET_AGE: f64 = 0.20;
const WEIGHT_CONCENTRATION: f64 = 0.15;
const WEIGHT_WALLET_ACTIVITY: f64 = 0.08;
const WEIGHT_PRICE_EXTREMITY: f64 = 0.04;
const WEIGHT_FUNDING: f64 = 0.03;

/// Empirical parameters for the concentration ratio (not baseline-driven)
const CONCENTRATION_MEAN: f64 = 0.6;
const CONCENTRATION_STD: f64 = 0.2;

/// Trinity boost: all three core signals at |z| >= 2
const TRINITY_Z: f64 = 2.0;
const TRINITY_MULTIPLIER: f64 = 1.25;

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ---------------------------------------------------------------------------
// Z vector
// ---------------------------------------------------------------------------

/// The per-trade feature z-scores. usdc_size is computed for the breakdown
/// but is not one of the seven stored features.
#[derive(Debug, Default, Clone)]
pub struct ZVector {
    pub size: Option<f64>,
    pub timing: Option<f64>,
    pub wallet_age: Option<f64>,
    pub wallet_activity: Option<f64>,
    pub price_extremity: Option<f64>,
    pub position_concentration: Option<f64>,
    pub funding_proximity: Option<f64>,
    pub usdc_size: Option<f64>,
}

/// Weighted combination: each present feature contributes
/// weight * min(|z| / 3, 1). Absent features contribute nothing.
pub fn weighted_anomaly(z: &ZVector) -> f64 {
    let mut score = 0.0;
    let mut add = |weight: f64, value: Option<f64>| {
        if let Some(v) = value {
            score += weight * (v.abs() / 3.0).min(1.0);
        }
    };
    add(WEIGHT_SIZE, z.size);
    add(WEIGHT_TIMING, z.timing);
    add(WEIGHT_WALLET_AGE, z.wallet_age);
    add(WEIGHT_CONCENTRATION, z.position_concentration);
    add(WEIGHT_WALLET_ACTIVITY, z.wallet_activity);
    add(WEIGHT_PRICE_EXTREMITY, z.price_extremity);
    add(WEIGHT_FUNDING, z.funding_proximity);
    score.clamp(0.0, 1.0)
}

/// Legacy combination: RMS of the present z-scores normalized by 3 sigma
pub fn legacy_anomaly(zs: &[Option<f64>]) -> f64 {
    let present: Vec<f64> = zs.iter().filter_map(|z| *z).collect();
    if present.is_empty() {
        return 0.0;
    }
    let rms = (present.iter().map(|z| z * z).sum::<f64>() / present.len() as f64).sqrt();
    (rms / 3.0).clamp(0.0, 1.0)
}

/// All three core signals co-firing at |z| >= 2
pub fn trinity_pattern(z: &ZVector) -> bool {
    matches!(
        (z.size, z.timing, z.wallet_age),
        (Some(s), Some(t), Some(w))
            if s.abs() >= TRINITY_Z && t.abs() >= TRINITY_Z && w.abs() >= TRINITY_Z
    )
}

/// 0.4 anomaly + 0.4 best pattern + 0.2 correctness, clamped to 1
pub fn insider_probability(anomaly: f64, pattern_score: f64, was_correct: Option<bool>) -> f64 {
    let correctness = if was_correct == Some(true) { 1.0 } else { 0.0 };
    (0.4 * anomaly + 0.4 * pattern_score + 0.2 * correctness).clamp(0.0, 1.0)
}

/// Severity bucket for a |z| value
pub fn severity_bucket(z: f64) -> &'static str {
    let abs = z.abs();
    if abs >= 3.0 {
        "extreme"
    } else if abs >= 2.5 {
        "very_high"
    } else if abs >= 2.0 {
        "high"
    } else if abs >= 1.5 {
        "elevated"
    } else {
        "normal"
    }
}

/// Signed net position per outcome; D/T concentration rescaled to [0,1].
/// raw = max|net| / sum|net| lives in [0.5, 1] for two outcomes, so the
/// rescale stretches it across the full unit interval.
pub fn position_concentration(trades: &[TradeRecord]) -> f64 {
    let mut nets: HashMap<i64, f64> = HashMap::new();
    for trade in trades {
        let size: f64 = trade.size.parse().unwrap_or(0.0);
        let signed = if trade.is_buy() { size } else { -size };
        *nets.entry(trade.outcome_index).or_insert(0.0) += signed;
    }

    let total: f64 = nets.values().map(|n| n.abs()).sum();
    if total == 0.0 {
        return 0.0;
    }
    let dominant = nets.values().map(|n| n.abs()).fold(0.0, f64::max);
    let raw = dominant / total;
    ((raw - 0.5) * 2.0).max(0.0)
}

// ---------------------------------------------------------------------------
// Baseline set
// ---------------------------------------------------------------------------

/// All baseline rows keyed by (category, metric), with 'all' fallback
pub struct BaselineSet {
    map: HashMap<(String, String), BaselineRecord>,
}

impl BaselineSet {
    pub async fn load(pool: &SqlitePool) -> DbResult<Self> {
        let rows = BaselineRepository::new(pool).all().await?;
        let map = rows
            .into_iter()
            .map(|row| ((row.category.clone(), row.metric.clone()), row))
            .collect();
        Ok(Self { map })
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn get(&self, category: &str, metric: &str) -> Option<&BaselineRecord> {
        self.map
            .get(&(category.to_string(), metric.to_string()))
            .or_else(|| self.map.get(&(ALL_CATEGORY.to_string(), metric.to_string())))
    }

    /// Z-score against the category baseline, falling back to 'all'.
    /// None when no baseline exists, sigma is 0, or the value is missing.
    pub fn zscore(&self, category: &str, metric: &str, value: Option<f64>) -> Option<f64> {
        let baseline = self.get(category, metric)?;
        zscore(value, baseline.mean, baseline.std_dev).map(round4)
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize)]
pub struct ScoreSummary {
    pub scored: u64,
    pub skipped: u64,
    pub errors: u64,
}

pub struct Scorer<'a> {
    pool: &'a SqlitePool,
    baselines: BaselineSet,
    patterns: Vec<PatternRecord>,
}

impl<'a> Scorer<'a> {
    /// Load baselines and active patterns once for a scoring pass
    pub async fn load(pool: &'a SqlitePool) -> DbResult<Self> {
        let baselines = BaselineSet::load(pool).await?;
        let patterns = PatternRepository::new(pool).all_active().await?;
        Ok(Self {
            pool,
            baselines,
            patterns,
        })
    }

    /// Compute the z-vector for one trade
    async fn z_vector(&self, trade: &TradeRecord, category: &str) -> DbResult<ZVector> {
        let size: Option<f64> = trade.size.parse().ok();
        let usdc: Option<f64> = trade.usdc_size.parse().ok();

        let wallet_trades = TradeRepository::new(self.pool)
            .for_wallet_on_market(&trade.wallet_address, trade.market_id)
            .await?;
        let concentration = position_concentration(&wallet_trades);
        let concentration_z =
            round4((concentration - CONCENTRATION_MEAN) / CONCENTRATION_STD);

        Ok(ZVector {
            size: self.baselines.zscore(category, "size", size),
            timing: self
                .baselines
                .zscore(category, "timing", trade.hours_before_resolution),
            wallet_age: self
                .baselines
                .zscore(category, "wallet_age", trade.wallet_age_days),
            wallet_activity: self.baselines.zscore(
                category,
                "wallet_activity",
                trade.wallet_trade_count.map(|c| c as f64),
            ),
            price_extremity: self
                .baselines
                .zscore(category, "price_extremity", trade.price_extremity),
            position_concentration: Some(concentration_z),
            // Left null until a funding signal exists; never fabricated
            funding_proximity: None,
            usdc_size: self.baselines.zscore(category, "usdc_size", usdc),
        })
    }

    /// Score one trade and upsert its score row. Returns the stored record.
    pub async fn score_trade(&self, trade: &TradeRecord) -> anyhow::Result<TradeScoreRecord> {
        let trade_id = trade.id.ok_or_else(|| anyhow::anyhow!("trade without id"))?;
        let category = MarketRepository::new(self.pool)
            .get_by_id(trade.market_id)
            .await?
            .map(|m| m.category)
            .unwrap_or_else(|| "other".to_string());

        let z = self.z_vector(trade, &category).await?;

        let mut anomaly = weighted_anomaly(&z);
        let trinity = trinity_pattern(&z);
        if trinity {
            anomaly = (anomaly * TRINITY_MULTIPLIER).min(1.0);
        }
        anomaly = round4(anomaly);

        // Evaluate patterns against the provisional score so rules can see
        // the anomaly value; probability is derived from the best match.
        let mut record = TradeScoreRecord {
            id: None,
            trade_id,
            size_zscore: z.size,
            timing_zscore: z.timing,
            wallet_age_zscore: z.wallet_age,
            wallet_activity_zscore: z.wallet_activity,
            price_extremity_zscore: z.price_extremity,
            position_concentration_zscore: z.position_concentration,
            funding_proximity_zscore: z.funding_proximity,
            anomaly_score: anomaly,
            insider_probability: 0.0,
            trinity_pattern: trinity,
            matched_patterns: "{}".into(),
            score_breakdown: "{}".into(),
            scored_at: Utc::now().timestamp(),
            score_mode: Some("weighted".into()),
        };

        let matched = match_patterns(&self.patterns, &metric_map(&record, trade));
        let pattern_score = matched.values().copied().fold(0.0, f64::max);
        record.insider_probability =
            round4(insider_probability(anomaly, pattern_score, trade.was_correct));
        record.matched_patterns = serde_json::to_string(&matched)?;
        record.score_breakdown = serde_json::to_string(&breakdown(&z))?;

        let id = ScoreRepository::new(self.pool).upsert(&record).await?;
        record.id = Some(id);
        Ok(record)
    }

    pub async fn score_trade_id(&self, trade_id: i64) -> anyhow::Result<Option<TradeScoreRecord>> {
        let Some(trade) = TradeRepository::new(self.pool).get_by_id(trade_id).await? else {
            return Ok(None);
        };
        Ok(Some(self.score_trade(&trade).await?))
    }

    /// Score every trade without a score row, in batches
    pub async fn score_unscored(
        &self,
        batch_size: i64,
        cancelled: &AtomicBool,
    ) -> ScoreSummary {
        let mut summary = ScoreSummary::default();
        let repo = TradeRepository::new(self.pool);

        loop {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let ids = match repo.unscored_ids(batch_size).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, "Could not list unscored trades");
                    summary.errors += 1;
                    break;
                }
            };
            if ids.is_empty() {
                break;
            }
            let mut batch_progress = 0u64;
            for id in ids {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                match self.score_trade_id(id).await {
                    Ok(Some(_)) => {
                        summary.scored += 1;
                        batch_progress += 1;
                    }
                    Ok(None) => summary.skipped += 1,
                    Err(e) => {
                        summary.errors += 1;
                        warn!(error = %e, trade_id = id, "Scoring failed");
                    }
                }
            }
            // A batch with zero progress would re-read the same ids forever
            if batch_progress == 0 {
                break;
            }
        }

        info!(scored = summary.scored, errors = summary.errors, "Scoring pass finished");
        summary
    }

    /// Re-score every trade in place, in pages
    pub async fn rescore_all(&self, batch_size: i64, cancelled: &AtomicBool) -> ScoreSummary {
        let mut summary = ScoreSummary::default();
        let repo = TradeRepository::new(self.pool);
        let mut offset = 0i64;

        loop {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }
            let ids = match repo.ids_page(offset, batch_size).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(error = %e, "Could not page trades");
                    summary.errors += 1;
                    break;
                }
            };
            if ids.is_empty() {
                break;
            }
            offset += ids.len() as i64;
            for id in ids {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                match self.score_trade_id(id).await {
                    Ok(Some(_)) => summary.scored += 1,
                    Ok(None) => summary.skipped += 1,
                    Err(e) => {
                        summary.errors += 1;
                        warn!(error = %e, trade_id = id, "Re-scoring failed");
                    }
                }
            }
        }

        info!(rescored = summary.scored, "Re-scoring pass finished");
        summary
    }
}

/// Per-metric z and severity bucket, stored alongside the score
fn breakdown(z: &ZVector) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    let mut put = |key: &str, value: Option<f64>| {
        if let Some(v) = value {
            map.insert(
                key.to_string(),
                serde_json::json!({ "zscore": round4(v), "severity": severity_bucket(v) }),
            );
        }
    };
    put("size", z.size);
    put("usdc_size", z.usdc_size);
    put("timing", z.timing);
    put("wallet_age", z.wallet_age);
    put("wallet_activity", z.wallet_activity);
    put("price_extremity", z.price_extremity);
    put("position_concentration", z.position_concentration);
    put("funding_proximity", z.funding_proximity);
    serde_json::Value::Object(map)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::seed_default_patterns;
    use crate::testutil::{seed_baseline, seed_market, seed_trade, SeedTrade};
    use persistence::Database;

    #[test]
    fn test_weighted_anomaly_skips_missing_features() {
        let z = ZVector {
            size: Some(4.0),
            ..Default::default()
        };
        // Only size contributes: 0.25 * min(4/3, 1) = 0.25
        assert!((weighted_anomaly(&z) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_anomaly_saturates_at_three_sigma() {
        let z = ZVector {
            size: Some(3.0),
            timing: Some(-30.0),
            wallet_age: Some(300.0),
            wallet_activity: Some(3.0),
            price_extremity: Some(3.0),
            position_concentration: Some(3.0),
            funding_proximity: Some(3.0),
            usdc_size: None,
        };
        // Every feature saturated: sum of all weights = 1.0
        assert!((weighted_anomaly(&z) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_legacy_anomaly_rms() {
        let anomaly = legacy_anomaly(&[Some(3.0), Some(3.0), None]);
        assert!((anomaly - 1.0).abs() < 1e-9);
        let anomaly = legacy_anomaly(&[Some(1.5), None]);
        assert!((anomaly - 0.5).abs() < 1e-9);
        assert_eq!(legacy_anomaly(&[None, None]), 0.0);
    }

    #[test]
    fn test_trinity_requires_all_three() {
        let mut z = ZVector {
            size: Some(2.5),
            timing: Some(-2.1),
            wallet_age: Some(-2.0),
            ..Default::default()
        };
        assert!(trinity_pattern(&z));

        z.wallet_age = Some(-1.9);
        assert!(!trinity_pattern(&z));

        z.wallet_age = None;
        assert!(!trinity_pattern(&z));
    }

    #[test]
    fn test_trinity_boost_clamped() {
        // 0.9 * 1.25 > 1 -> clamp to 1
        let boosted = (0.9f64 * TRINITY_MULTIPLIER).min(1.0);
        assert_eq!(boosted, 1.0);
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(severity_bucket(0.3), "normal");
        assert_eq!(severity_bucket(-1.6), "elevated");
        assert_eq!(severity_bucket(2.2), "high");
        assert_eq!(severity_bucket(-2.7), "very_high");
        assert_eq!(severity_bucket(3.5), "extreme");
    }

    #[test]
    fn test_insider_probability_components() {
        assert!((insider_probability(0.5, 1.0, Some(true)) - 0.8).abs() < 1e-9);
        assert!((insider_probability(0.5, 0.0, None) - 0.2).abs() < 1e-9);
        assert_eq!(insider_probability(1.0, 1.0, Some(true)), 1.0);
        // Incorrect trades earn no correctness component
        assert!((insider_probability(0.5, 0.5, Some(false)) - 0.4).abs() < 1e-9);
    }

    fn concentration_trade(side: &str, outcome_index: i64, size: f64) -> TradeRecord {
        TradeRecord {
            id: None,
            transaction_hash: String::new(),
            market_id: 1,
            wallet_id: 1,
            wallet_address: "0xw".into(),
            condition_id: "0xc".into(),
            side: side.into(),
            outcome: if outcome_index == 0 { "Yes".into() } else { "No".into() },
            outcome_index,
            size: size.to_string(),
            price: "0.5".into(),
            usdc_size: (size * 0.5).to_string(),
            trade_timestamp: 0,
            hours_before_resolution: None,
            wallet_age_days: None,
            wallet_trade_count: None,
            price_extremity: None,
            was_correct: None,
            profit_loss: None,
            meta: "{}".into(),
        }
    }

    #[test]
    fn test_position_concentration_single_outcome() {
        // Two BUY Yes 100 and one SELL Yes 50: net Yes 150, net No 0
        let trades = vec![
            concentration_trade("BUY", 0, 100.0),
            concentration_trade("BUY", 0, 100.0),
            concentration_trade("SELL", 0, 50.0),
        ];
        let conc = position_concentration(&trades);
        assert!((conc - 1.0).abs() < 1e-9);
        // z = (1.0 - 0.6) / 0.2 = 2.0
        let z = (conc - CONCENTRATION_MEAN) / CONCENTRATION_STD;
        assert!((z - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_position_concentration_balanced_book() {
        // Equal net on both outcomes: raw 0.5 -> concentration 0
        let trades = vec![
            concentration_trade("BUY", 0, 100.0),
            concentration_trade("BUY", 1, 100.0),
        ];
        assert!((position_concentration(&trades)).abs() < 1e-9);
    }

    #[test]
    fn test_position_concentration_flat_is_zero() {
        // Fully flat: T = 0 -> concentration 0
        let trades = vec![
            concentration_trade("BUY", 0, 100.0),
            concentration_trade("SELL", 0, 100.0),
        ];
        assert_eq!(position_concentration(&trades), 0.0);
    }

    #[tokio::test]
    async fn test_whale_correct_trade_scores_and_matches() {
        // Baselines: politics size mean 100 sigma 50; a 300-size correct BUY
        let db = Database::in_memory().await.unwrap();
        seed_baseline(&db, "politics", "size", 100.0, 50.0).await;
        seed_default_patterns(db.pool()).await.unwrap();

        let market_id = seed_market(&db, "0xpol", "politics", Some(("Yes", 1_700_086_400)), true).await;
        let trade_id = seed_trade(
            &db,
            SeedTrade {
                tx: "0xwhale",
                market_id,
                condition_id: "0xpol",
                wallet: "0xinsider",
                size: 300.0,
                price: 0.5,
                ts: 1_700_000_000,
                hours_before: Some(24.0),
                was_correct: Some(true),
                ..Default::default()
            },
        )
        .await;

        let scorer = Scorer::load(db.pool()).await.unwrap();
        let score = scorer.score_trade_id(trade_id).await.unwrap().unwrap();

        assert!((score.size_zscore.unwrap() - 4.0).abs() < 1e-9);
        assert!(score.anomaly_score >= 0.33);
        assert!(!score.trinity_pattern);

        let matched: HashMap<String, f64> =
            serde_json::from_str(&score.matched_patterns).unwrap();
        assert!(matched.contains_key("whale_correct"));
        assert!(matched.contains_key("whale_trade"));
        assert!(score.insider_probability > 0.5);

        // No baseline for timing: z stays null, not 0
        assert_eq!(score.timing_zscore, None);
        assert_eq!(score.funding_proximity_zscore, None);
    }

    #[tokio::test]
    async fn test_rescoring_replaces_in_place() {
        let db = Database::in_memory().await.unwrap();
        seed_baseline(&db, "politics", "size", 100.0, 50.0).await;

        let market_id = seed_market(&db, "0xpol2", "politics", Some(("Yes", 1_700_086_400)), true).await;
        let trade_id = seed_trade(
            &db,
            SeedTrade {
                tx: "0xrescore",
                market_id,
                condition_id: "0xpol2",
                size: 200.0,
                ..Default::default()
            },
        )
        .await;

        let scorer = Scorer::load(db.pool()).await.unwrap();
        scorer.score_trade_id(trade_id).await.unwrap();
        scorer.score_trade_id(trade_id).await.unwrap();

        let repo = ScoreRepository::new(db.pool());
        assert_eq!(repo.count().await.unwrap(), 1);
        let score = repo.get_by_trade(trade_id).await.unwrap().unwrap();
        assert!((score.size_zscore.unwrap() - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_score_unscored_only_touches_missing() {
        let db = Database::in_memory().await.unwrap();
        seed_baseline(&db, "all", "size", 100.0, 50.0).await;
        let market_id = seed_market(&db, "0xbatch", "crypto", Some(("Yes", 1_700_086_400)), true).await;

        for i in 0..5 {
            seed_trade(
                &db,
                SeedTrade {
                    tx: &format!("0xb{i}"),
                    market_id,
                    condition_id: "0xbatch",
                    ..Default::default()
                },
            )
            .await;
        }

        let scorer = Scorer::load(db.pool()).await.unwrap();
        let summary = scorer.score_unscored(2, &AtomicBool::new(false)).await;
        assert_eq!(summary.scored, 5);
        assert_eq!(summary.errors, 0);

        // A second pass finds nothing to do
        let summary = scorer.score_unscored(2, &AtomicBool::new(false)).await;
        assert_eq!(summary.scored, 0);
    }
}
