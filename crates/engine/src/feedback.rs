//! Feedback loop — confirmed cases retrain baselines and re-validate rules
//!
//! One iteration: mark new confirmed insiders for training, recompute the
//! insider baselines and separation scores, re-validate every pattern,
//! optionally re-score all trades (batched, flag-guarded), run a fresh
//! discovery, and classify the improvement from the pre/post deltas.

use crate::baseline::{compute_baselines, compute_insider_baselines};
use crate::discovery::{run_discovery, DiscoveryRequest};
use crate::patterns::validate_patterns;
use crate::scorer::Scorer;
use persistence::repository::{BaselineRepository, CandidateRepository, InsiderRepository, PatternRepository};
use persistence::SqlitePool;
use serde::Serialize;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

const RESCORE_BATCH_SIZE: i64 = 500;

#[derive(Debug, Clone)]
pub struct FeedbackOptions {
    /// Re-score every trade after re-baselining. Expensive.
    pub rescore: bool,
    pub discovery: DiscoveryRequest,
}

impl Default for FeedbackOptions {
    fn default() -> Self {
        Self {
            rescore: false,
            discovery: DiscoveryRequest::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Improvement {
    Significant,
    Moderate,
    Slight,
    None,
    Regression,
}

impl Improvement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Significant => "significant",
            Self::Moderate => "moderate",
            Self::Slight => "slight",
            Self::None => "none",
            Self::Regression => "regression",
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct FeedbackStats {
    pub avg_separation: Option<f64>,
    pub avg_f1: Option<f64>,
    pub insider_samples: i64,
    pub insiders_trained: i64,
    pub candidates: i64,
}

#[derive(Debug, Serialize)]
pub struct FeedbackReport {
    pub marked_for_training: u64,
    pub pre: FeedbackStats,
    pub post: FeedbackStats,
    pub separation_delta: Option<f64>,
    pub f1_delta: Option<f64>,
    pub rescored: u64,
    pub new_candidates: i64,
    pub improvement: Improvement,
}

async fn collect_stats(pool: &SqlitePool) -> anyhow::Result<FeedbackStats> {
    let baselines = BaselineRepository::new(pool);
    let patterns = PatternRepository::new(pool);
    let insiders = InsiderRepository::new(pool);
    let candidates = CandidateRepository::new(pool);

    Ok(FeedbackStats {
        avg_separation: baselines.avg_separation().await?,
        avg_f1: patterns.avg_f1().await?,
        insider_samples: baselines.total_insider_samples().await?,
        insiders_trained: insiders.count_trained().await?,
        candidates: candidates.count().await?,
    })
}

/// Delta between optional pre/post metrics. A metric appearing for the
/// first time counts as its full value.
fn delta(pre: Option<f64>, post: Option<f64>) -> Option<f64> {
    match (pre, post) {
        (Some(a), Some(b)) => Some(b - a),
        (None, Some(b)) => Some(b),
        _ => None,
    }
}

/// Classify the iteration from the separation and F1 deltas
pub fn classify_improvement(separation_delta: Option<f64>, f1_delta: Option<f64>) -> Improvement {
    let sep = separation_delta.unwrap_or(0.0);
    let f1 = f1_delta.unwrap_or(0.0);

    if sep >= 0.5 || f1 >= 0.1 {
        Improvement::Significant
    } else if sep >= 0.2 || f1 >= 0.05 {
        Improvement::Moderate
    } else if sep > 0.0 || f1 > 0.0 {
        Improvement::Slight
    } else if sep < 0.0 || f1 < 0.0 {
        Improvement::Regression
    } else {
        Improvement::None
    }
}

/// Run one full feedback iteration
pub async fn run_feedback_iteration(
    pool: &SqlitePool,
    options: &FeedbackOptions,
    cancelled: &AtomicBool,
) -> anyhow::Result<FeedbackReport> {
    let pre = collect_stats(pool).await?;

    // 1. Fold new confirmations into the training set
    let insiders = InsiderRepository::new(pool);
    let untrained = insiders.untrained().await?;
    let ids: Vec<i64> = untrained.iter().filter_map(|r| r.id).collect();
    let marked = insiders.mark_used_for_training(&ids).await?;
    info!(marked, "Confirmed insiders marked for training");

    // 2. Re-baseline. The insider pass needs normal rows to attach to, so
    //    bootstrap them when the table is still empty.
    let baselines = BaselineRepository::new(pool);
    if baselines.all().await?.is_empty() {
        compute_baselines(pool).await;
    }
    compute_insider_baselines(pool).await;

    // 3. Re-validate every pattern against the updated insider set
    validate_patterns(pool).await?;

    // 4. Optional full re-score
    let mut rescored = 0u64;
    if options.rescore {
        match Scorer::load(pool).await {
            Ok(scorer) => {
                let summary = scorer.rescore_all(RESCORE_BATCH_SIZE, cancelled).await;
                rescored = summary.scored;
            }
            Err(e) => warn!(error = %e, "Re-score skipped: scorer failed to load"),
        }
    }

    // 5. Fresh discovery over the (possibly re-scored) trades
    let discovery = run_discovery(pool, &options.discovery).await?;

    // 6. Deltas and classification
    let post = collect_stats(pool).await?;
    let separation_delta = delta(pre.avg_separation, post.avg_separation);
    let f1_delta = delta(pre.avg_f1, post.avg_f1);
    let improvement = classify_improvement(separation_delta, f1_delta);

    let report = FeedbackReport {
        marked_for_training: marked,
        separation_delta,
        f1_delta,
        rescored,
        new_candidates: discovery.candidates_created,
        improvement,
        pre,
        post,
    };

    info!(
        marked = report.marked_for_training,
        new_candidates = report.new_candidates,
        improvement = report.improvement.as_str(),
        "Feedback iteration finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
