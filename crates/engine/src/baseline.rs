//! Baseline engine — per (category, metric) statistical distributions
//!
//! Distributions are computed over trades on resolved markets. Fewer than 10
//! samples is insufficient data: nothing is persisted for that key. The
//! insider distribution is the same computation restricted to trades linked
//! from confirmed insiders, stored on the 'all' rows; Cohen's d between the
//! two tracks is the separation score.

use chrono::Utc;
use persistence::repository::{BaselineRepository, NormalStats};
use persistence::SqlitePool;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Metrics baselined per category
pub const BASELINE_METRICS: &[&str] = &[
    "size",
    "usdc_size",
    "timing",
    "wallet_age",
    "wallet_activity",
    "price_extremity",
];

/// Market categories; 'all' is the pseudo-category spanning every market
pub const CATEGORIES: &[&str] = &[
    "politics",
    "corporate",
    "legal",
    "crypto",
    "sports",
    "entertainment",
    "science",
    "other",
];

pub const ALL_CATEGORY: &str = "all";

/// Minimum sample count below which no baseline is persisted
pub const MIN_SAMPLES: usize = 10;

/// Cohen's d is clamped here to keep the column bounded
const MAX_SEPARATION: f64 = 9.9999;

// ---------------------------------------------------------------------------
// Pure statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Distribution {
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub sample_count: usize,
}

/// Linear-interpolated percentile over a sorted sample
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let weight = rank - lo as f64;
    sorted[lo] * (1.0 - weight) + sorted[hi] * weight
}

/// Mean, population stddev, and interpolated percentiles.
/// None when the sample is below MIN_SAMPLES.
pub fn compute_distribution(values: &[f64]) -> Option<Distribution> {
    if values.len() < MIN_SAMPLES {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    Some(Distribution {
        mean,
        std_dev,
        median: percentile(&sorted, 50.0),
        p75: percentile(&sorted, 75.0),
        p90: percentile(&sorted, 90.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        sample_count: values.len(),
    })
}

/// (x - mean) / stddev. None when stddev is not positive or the input is
/// missing — never substituted with 0.
pub fn zscore(value: Option<f64>, mean: f64, std_dev: f64) -> Option<f64> {
    let value = value?;
    if std_dev <= 0.0 || !std_dev.is_finite() || !value.is_finite() {
        return None;
    }
    Some((value - mean) / std_dev)
}

/// Cohen's d between the normal and insider distributions, clamped.
/// Undefined when either stddev is zero or missing.
pub fn cohens_d(
    normal_mean: f64,
    normal_std: f64,
    insider_mean: f64,
    insider_std: f64,
) -> Option<f64> {
    if normal_std <= 0.0 || insider_std <= 0.0 {
        return None;
    }
    let pooled = ((normal_std.powi(2) + insider_std.powi(2)) / 2.0).sqrt();
    if pooled <= 0.0 {
        return None;
    }
    let d = (insider_mean - normal_mean).abs() / pooled;
    Some(d.min(MAX_SEPARATION))
}

// ---------------------------------------------------------------------------
// Batch computation
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Serialize)]
pub struct BaselineSummary {
    pub computed: u64,
    pub insufficient: u64,
    pub insider_computed: u64,
    pub insider_insufficient: u64,
    pub errors: u64,
}

/// Compute and persist the normal distributions for every category
/// (including 'all') and metric.
pub async fn compute_baselines(pool: &SqlitePool) -> BaselineSummary {
    let repo = BaselineRepository::new(pool);
    let now = Utc::now().timestamp();
    let mut summary = BaselineSummary::default();

    let mut keys: Vec<Option<&str>> = vec![None];
    keys.extend(CATEGORIES.iter().map(|c| Some(*c)));

    for category in keys {
        let label = category.unwrap_or(ALL_CATEGORY);
        for metric in BASELINE_METRICS {
            let values = match repo.metric_values(metric, category).await {
                Ok(values) => values,
                Err(e) => {
                    summary.errors += 1;
                    warn!(error = %e, category = label, metric, "Metric extraction failed");
                    continue;
                }
            };

            let Some(dist) = compute_distribution(&values) else {
                summary.insufficient += 1;
                debug!(category = label, metric, samples = values.len(), "Insufficient data");
                continue;
            };

            let stats = NormalStats {
                mean: dist.mean,
                std_dev: dist.std_dev,
                median: dist.median,
                p75: dist.p75,
                p90: dist.p90,
                p95: dist.p95,
                p99: dist.p99,
                sample_count: dist.sample_count as i64,
            };
            match repo.upsert_normal(label, metric, &stats, now).await {
                Ok(()) => summary.computed += 1,
                Err(e) => {
                    summary.errors += 1;
                    warn!(error = %e, category = label, metric, "Baseline upsert failed");
                }
            }
        }
    }

    info!(
        computed = summary.computed,
        insufficient = summary.insufficient,
        "Baselines computed"
    );
    summary
}

/// Compute the insider distributions and separation scores onto the
/// ('all', metric) rows.
pub async fn compute_insider_baselines(pool: &SqlitePool) -> BaselineSummary {
    let repo = BaselineRepository::new(pool);
    let now = Utc::now().timestamp();
    let mut summary = BaselineSummary::default();

    for metric in BASELINE_METRICS {
        let values = match repo.insider_metric_values(metric).await {
            Ok(values) => values,
            Err(e) => {
                summary.errors += 1;
                warn!(error = %e, metric, "Insider metric extraction failed");
                continue;
            }
        };

        let Some(dist) = compute_distribution(&values) else {
            summary.insider_insufficient += 1;
            continue;
        };

        let separation = match repo.get(ALL_CATEGORY, metric).await {
            Ok(Some(normal)) => cohens_d(normal.mean, normal.std_dev, dist.mean, dist.std_dev),
            _ => None,
        };

        match repo
            .update_insider(metric, dist.mean, dist.std_dev, dist.sample_count as i64, separation, now)
            .await
        {
            Ok(true) => summary.insider_computed += 1,
            Ok(false) => {
                // No normal row to attach to — the normal pass was insufficient
                summary.insider_insufficient += 1;
            }
            Err(e) => {
                summary.errors += 1;
                warn!(error = %e, metric, "Insider baseline update failed");
            }
        }
    }

    info!(insider_computed = summary.insider_computed, "Insider baselines computed");
    summary
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_market, seed_trade, SeedTrade};
    use persistence::Database;

    #[test]
    fn test_percentile_interpolates() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&sorted, 50.0) - 2.5).abs() < 1e-9);
        assert!((percentile(&sorted, 0.0) - 1.0).abs() < 1e-9);
        assert!((percentile(&sorted, 100.0) - 4.0).abs() < 1e-9);
        assert!((percentile(&sorted, 75.0) - 3.25).abs() < 1e-9);
    }

    #[test]
    fn test_distribution_known_values() {
        // 10 values 1..=10: mean 5.5, population stddev ~2.8723
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let dist = compute_distribution(&values).unwrap();
        assert!((dist.mean - 5.5).abs() < 1e-9);
        assert!((dist.std_dev - 2.8722813232690143).abs() < 1e-9);
        assert!((dist.median - 5.5).abs() < 1e-9);
        assert_eq!(dist.sample_count, 10);
    }

    #[test]
    fn test_insufficient_data_returns_none() {
        let values: Vec<f64> = (1..=9).map(|v| v as f64).collect();
        assert!(compute_distribution(&values).is_none());
    }

    #[test]
    fn test_zscore_basic() {
        assert!((zscore(Some(300.0), 100.0, 50.0).unwrap() - 4.0).abs() < 1e-9);
        assert!((zscore(Some(100.0), 100.0, 50.0).unwrap()).abs() < 1e-9);
    }

    #[test]
    fn test_zscore_null_never_zero() {
        // Missing input or degenerate stddev yields None, not 0
        assert_eq!(zscore(None, 100.0, 50.0), None);
        assert_eq!(zscore(Some(300.0), 100.0, 0.0), None);
        assert_eq!(zscore(Some(300.0), 100.0, -1.0), None);
    }

    #[test]
    fn test_cohens_d() {
        // Equal stddevs: d = |diff| / std
        let d = cohens_d(100.0, 50.0, 300.0, 50.0).unwrap();
        assert!((d - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_cohens_d_clamped() {
        let d = cohens_d(0.0, 0.001, 1_000_000.0, 0.001).unwrap();
        assert!((d - 9.9999).abs() < 1e-9);
    }

    #[test]
    fn test_cohens_d_undefined_on_zero_std() {
        assert_eq!(cohens_d(100.0, 0.0, 300.0, 50.0), None);
        assert_eq!(cohens_d(100.0, 50.0, 300.0, 0.0), None);
    }

    #[tokio::test]
    async fn test_no_row_persisted_below_min_samples() {
        let db = Database::in_memory().await.unwrap();
        let market_id = seed_market(&db, "0xc1", "politics", Some(("Yes", 1_700_100_000)), true).await;

        // Only 5 trades: below the floor for every metric
        for i in 0..5 {
            seed_trade(
                &db,
                SeedTrade {
                    tx: &format!("0xt{i}"),
                    market_id,
                    condition_id: "0xc1",
                    wallet: "0xw",
                    size: 100.0 + i as f64,
                    ..Default::default()
                },
            )
            .await;
        }

        let summary = compute_baselines(db.pool()).await;
        assert_eq!(summary.computed, 0);
        assert!(summary.insufficient > 0);

        let repo = BaselineRepository::new(db.pool());
        assert!(repo.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_baselines_computed_per_category_and_all() {
        let db = Database::in_memory().await.unwrap();
        let market_id = seed_market(&db, "0xc2", "politics", Some(("Yes", 1_700_100_000)), true).await;

        for i in 0..12 {
            seed_trade(
                &db,
                SeedTrade {
                    tx: &format!("0xb{i}"),
                    market_id,
                    condition_id: "0xc2",
                    wallet: "0xw",
                    size: 50.0 + 10.0 * i as f64,
                    ..Default::default()
                },
            )
            .await;
        }

        let summary = compute_baselines(db.pool()).await;
        assert!(summary.computed >= 2);

        let repo = BaselineRepository::new(db.pool());
        let politics = repo.get("politics", "size").await.unwrap().unwrap();
        assert_eq!(politics.sample_count, 12);
        assert!((politics.mean - 105.0).abs() < 1e-9);

        // The 'all' pseudo-category sees the same trades
        let all = repo.get("all", "size").await.unwrap().unwrap();
        assert_eq!(all.sample_count, 12);
    }
}
