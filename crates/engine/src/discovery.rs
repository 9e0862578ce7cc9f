//! Discovery — rank scored trades into investigation candidates
//!
//! One run selects scored trades above the thresholds (correct, on
//! event-based markets), skips trades already known as confirmed insiders or
//! candidates, and materializes the top N as ranked candidates under a new
//! discovery batch.

use chrono::Utc;
use persistence::repository::{
    BatchRepository, CandidateRecord, CandidateRepository, DiscoveryBatchRecord, ScoreRepository,
};
use persistence::SqlitePool;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DiscoveryRequest {
    pub min_anomaly_score: f64,
    pub min_insider_probability: f64,
    pub min_profit: Option<f64>,
    pub limit: usize,
    pub notes: Option<String>,
}

impl Default for DiscoveryRequest {
    fn default() -> Self {
        Self {
            min_anomaly_score: 0.5,
            min_insider_probability: 0.7,
            min_profit: None,
            limit: 20,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryOutcome {
    pub batch_id: String,
    pub trades_examined: i64,
    pub candidates_created: i64,
    pub top_score: Option<f64>,
    pub median_score: Option<f64>,
}

/// Priority from insider probability
pub fn priority_for(probability: f64) -> &'static str {
    if probability >= 0.9 {
        "critical"
    } else if probability >= 0.7 {
        "high"
    } else if probability >= 0.5 {
        "medium"
    } else {
        "low"
    }
}

fn batch_id_for(request: &DiscoveryRequest, started_at: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{:?}|{}|{}",
        request.min_anomaly_score,
        request.min_insider_probability,
        request.min_profit,
        request.limit,
        started_at
    ));
    let digest = hasher.finalize();
    let hex: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
    format!("batch_{hex}")
}

/// Run one discovery pass. Returns the completed batch summary.
pub async fn run_discovery(
    pool: &SqlitePool,
    request: &DiscoveryRequest,
) -> anyhow::Result<DiscoveryOutcome> {
    let started_at = Utc::now().timestamp();
    let batch_id = batch_id_for(request, started_at);

    let batches = BatchRepository::new(pool);
    batches
        .insert_started(&DiscoveryBatchRecord {
            id: None,
            batch_id: batch_id.clone(),
            min_anomaly_score: request.min_anomaly_score,
            min_insider_probability: request.min_insider_probability,
            min_profit: request.min_profit.map(|p| p.to_string()),
            limit_requested: request.limit as i64,
            trades_examined: 0,
            candidates_created: 0,
            top_score: None,
            median_score: None,
            started_at,
            completed_at: None,
            notes: request.notes.clone(),
        })
        .await?;

    let scores = ScoreRepository::new(pool);
    let examined = scores
        .count_above(request.min_insider_probability, request.min_anomaly_score)
        .await?;
    let rows = scores
        .discovery_rows(
            request.min_insider_probability,
            request.min_anomaly_score,
            request.min_profit,
            request.limit as i64,
        )
        .await?;

    let candidates = CandidateRepository::new(pool);
    let mut created_probabilities: Vec<f64> = Vec::new();
    let mut rank = 0i64;

    for row in &rows {
        rank += 1;
        let record = CandidateRecord {
            id: None,
            trade_id: row.trade_id,
            score_id: Some(row.score_id),
            market_id: Some(row.market_id),
            batch_id: Some(batch_id.clone()),
            discovery_rank: Some(rank),
            anomaly_score: row.anomaly_score,
            insider_probability: row.insider_probability,
            wallet_address: row.wallet_address.clone(),
            condition_id: row.condition_id.clone(),
            question: row.question.clone(),
            side: row.side.clone(),
            outcome: row.outcome.clone(),
            size: row.size.clone(),
            price: row.price.clone(),
            usdc_size: row.usdc_size.clone(),
            profit_loss: row.profit_loss.clone(),
            hours_before_resolution: row.hours_before_resolution,
            anomaly_breakdown: row.score_breakdown.clone(),
            status: "undiscovered".into(),
            priority: priority_for(row.insider_probability).into(),
            resolution: None,
            notes: "[]".into(),
            evidence: "[]".into(),
            discovered_at: started_at,
            resolved_at: None,
            assigned_to: None,
        };

        match candidates.insert(&record).await {
            Ok(Some(_)) => created_probabilities.push(row.insider_probability),
            Ok(None) => {
                // Raced with a concurrent promotion of the same trade
                rank -= 1;
            }
            Err(e) => {
                warn!(error = %e, trade_id = row.trade_id, "Candidate insert failed");
                rank -= 1;
            }
        }
    }

    let top_score = created_probabilities.first().copied();
    let median_score = median(&created_probabilities);
    let completed_at = Utc::now().timestamp();

    batches
        .complete(
            &batch_id,
            examined,
            created_probabilities.len() as i64,
            top_score,
            median_score,
            completed_at,
        )
        .await?;

    let outcome = DiscoveryOutcome {
        batch_id,
        trades_examined: examined,
        candidates_created: created_probabilities.len() as i64,
        top_score,
        median_score,
    };
    info!(
        batch_id = %outcome.batch_id,
        examined = outcome.trades_examined,
        created = outcome.candidates_created,
        "Discovery run finished"
    );
    Ok(outcome)
}

/// Median of an already-ordered probability list
fn median(sorted_desc: &[f64]) -> Option<f64> {
    if sorted_desc.is_empty() {
        return None;
    }
    let n = sorted_desc.len();
    if n % 2 == 1 {
        Some(sorted_desc[n / 2])
    } else {
        Some((sorted_desc[n / 2 - 1] + sorted_desc[n / 2]) / 2.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_insider, seed_market, seed_trade, SeedTrade};
    use persistence::repository::TradeScoreRecord;
    use persistence::Database;

    #[test]
    fn test_priority_cutoffs() {
        assert_eq!(priority_for(0.95), "critical");
        assert_eq!(priority_for(0.9), "critical");
        assert_eq!(priority_for(0.8), "high");
        assert_eq!(priority_for(0.6), "medium");
        assert_eq!(priority_for(0.3), "low");
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[0.9]), Some(0.9));
        assert!((median(&[0.9, 0.7]).unwrap() - 0.8).abs() < 1e-9);
        assert_eq!(median(&[0.9, 0.8, 0.7]), Some(0.8));
    }

    async fn seed_scored_trade(db: &Database, tx: &str, cid: &str, probability: f64) -> i64 {
        let market_id = seed_market(db, cid, "politics", Some(("Yes", 1_700_086_400)), true).await;
        let trade_id = seed_trade(
            db,
            SeedTrade {
                tx,
                market_id,
                condition_id: cid,
                wallet: &format!("0xw-{tx}"),
                was_correct: Some(true),
                profit: Some(150.0),
                ..Default::default()
            },
        )
        .await;

        let scores = ScoreRepository::new(db.pool());
        scores
            .upsert(&TradeScoreRecord {
                id: None,
                trade_id,
                size_zscore: Some(4.0),
                timing_zscore: None,
                wallet_age_zscore: None,
                wallet_activity_zscore: None,
                price_extremity_zscore: None,
                position_concentration_zscore: Some(2.0),
                funding_proximity_zscore: None,
                anomaly_score: 0.9,
                insider_probability: probability,
                trinity_pattern: false,
                matched_patterns: "{}".into(),
                score_breakdown: "{}".into(),
                scored_at: 1_700_000_000,
                score_mode: Some("weighted".into()),
            })
            .await
            .unwrap();
        trade_id
    }

    #[tokio::test]
    async fn test_discovery_excludes_known_trades() {
        let db = Database::in_memory().await.unwrap();

        let trade_a = seed_scored_trade(&db, "0xa", "0xma", 0.95).await;
        let trade_b = seed_scored_trade(&db, "0xb", "0xmb", 0.92).await;
        let trade_c = seed_scored_trade(&db, "0xc", "0xmc", 0.91).await;

        // A is a confirmed insider, B is already a candidate
        seed_insider(&db, "0xw-0xa", Some(trade_a)).await;
        let candidates = CandidateRepository::new(db.pool());
        candidates
            .insert(&CandidateRecord {
                id: None,
                trade_id: trade_b,
                score_id: None,
                market_id: None,
                batch_id: None,
                discovery_rank: None,
                anomaly_score: 0.9,
                insider_probability: 0.92,
                wallet_address: "0xw-0xb".into(),
                condition_id: "0xmb".into(),
                question: String::new(),
                side: "BUY".into(),
                outcome: "Yes".into(),
                size: "100".into(),
                price: "0.5".into(),
                usdc_size: "50".into(),
                profit_loss: None,
                hours_before_resolution: None,
                anomaly_breakdown: "{}".into(),
                status: "investigating".into(),
                priority: "high".into(),
                resolution: None,
                notes: "[]".into(),
                evidence: "[]".into(),
                discovered_at: 1_700_000_000,
                resolved_at: None,
                assigned_to: None,
            })
            .await
            .unwrap();

        let outcome = run_discovery(
            db.pool(),
            &DiscoveryRequest {
                limit: 10,
                min_insider_probability: 0.7,
                min_anomaly_score: 0.5,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.candidates_created, 1);
        let new_candidate = candidates.get_by_trade(trade_c).await.unwrap().unwrap();
        assert_eq!(new_candidate.discovery_rank, Some(1));
        assert_eq!(new_candidate.priority, "critical");
        assert_eq!(new_candidate.batch_id.as_deref(), Some(outcome.batch_id.as_str()));
    }

    #[tokio::test]
    async fn test_discovery_orders_and_limits() {
        let db = Database::in_memory().await.unwrap();
        seed_scored_trade(&db, "0x1", "0xm1", 0.75).await;
        let best = seed_scored_trade(&db, "0x2", "0xm2", 0.95).await;
        seed_scored_trade(&db, "0x3", "0xm3", 0.85).await;

        let outcome = run_discovery(
            db.pool(),
            &DiscoveryRequest {
                limit: 2,
                min_insider_probability: 0.7,
                min_anomaly_score: 0.5,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.candidates_created, 2);
        assert_eq!(outcome.top_score, Some(0.95));

        let candidates = CandidateRepository::new(db.pool());
        let top = candidates.get_by_trade(best).await.unwrap().unwrap();
        assert_eq!(top.discovery_rank, Some(1));

        let batch = BatchRepository::new(db.pool())
            .get(&outcome.batch_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.candidates_created, 2);
        assert!(batch.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_discovery_requires_correct_event_based() {
        let db = Database::in_memory().await.unwrap();

        // Incorrect trade on an event-based market: filtered out
        let market_id = seed_market(&db, "0xwrong", "politics", Some(("Yes", 1_700_086_400)), true).await;
        let trade_id = seed_trade(
            &db,
            SeedTrade {
                tx: "0xwrongtrade",
                market_id,
                condition_id: "0xwrong",
                was_correct: Some(false),
                ..Default::default()
            },
        )
        .await;
        ScoreRepository::new(db.pool())
            .upsert(&TradeScoreRecord {
                id: None,
                trade_id,
                size_zscore: Some(4.0),
                timing_zscore: None,
                wallet_age_zscore: None,
                wallet_activity_zscore: None,
                price_extremity_zscore: None,
                position_concentration_zscore: None,
                funding_proximity_zscore: None,
                anomaly_score: 0.9,
                insider_probability: 0.95,
                trinity_pattern: false,
                matched_patterns: "{}".into(),
                score_breakdown: "{}".into(),
                scored_at: 1_700_000_000,
                score_mode: None,
            })
            .await
            .unwrap();

        let outcome = run_discovery(db.pool(), &DiscoveryRequest::default()).await.unwrap();
        assert_eq!(outcome.candidates_created, 0);
    }
}
