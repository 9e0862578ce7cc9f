//! Investigation workflow — candidate status machine, evidence, promotion
//!
//! Status machine: undiscovered -> investigating -> resolved, with dismissal
//! allowed before resolution. Resolving as confirmed or likely insider
//! synthesizes a ConfirmedInsider row, feeding the training loop.

use chrono::Utc;
use persistence::repository::{
    CandidateRecord, CandidateRepository, ConfirmedInsiderRecord, InsiderRepository, TradeRecord,
    TradeRepository, WalletRepository,
};
use persistence::SqlitePool;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Undiscovered,
    Investigating,
    Resolved,
    Dismissed,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undiscovered => "undiscovered",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "undiscovered" => Some(Self::Undiscovered),
            "investigating" => Some(Self::Investigating),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    ConfirmedInsider,
    LikelyInsider,
    NotInsider,
    InsufficientEvidence,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfirmedInsider => "confirmed_insider",
            Self::LikelyInsider => "likely_insider",
            Self::NotInsider => "not_insider",
            Self::InsufficientEvidence => "insufficient_evidence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "confirmed_insider" => Some(Self::ConfirmedInsider),
            "likely_insider" => Some(Self::LikelyInsider),
            "not_insider" => Some(Self::NotInsider),
            "insufficient_evidence" => Some(Self::InsufficientEvidence),
            _ => None,
        }
    }

    /// Whether this resolution labels the wallet as an insider
    pub fn is_insider(&self) -> bool {
        matches!(self, Self::ConfirmedInsider | Self::LikelyInsider)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub at: i64,
    pub author: String,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

async fn load_candidate(pool: &SqlitePool, id: i64) -> anyhow::Result<CandidateRecord> {
    CandidateRepository::new(pool)
        .get(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("candidate {id} not found"))
}

fn require_status(candidate: &CandidateRecord, allowed: &[CandidateStatus]) -> anyhow::Result<()> {
    let current = CandidateStatus::parse(&candidate.status)
        .ok_or_else(|| anyhow::anyhow!("candidate {:?} has unknown status {}", candidate.id, candidate.status))?;
    if allowed.contains(&current) {
        Ok(())
    } else {
        anyhow::bail!(
            "invalid transition from {} (allowed from: {:?})",
            candidate.status,
            allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>()
        )
    }
}

/// Assign an investigator, moving the candidate into `investigating`
pub async fn assign(pool: &SqlitePool, id: i64, assignee: &str) -> anyhow::Result<CandidateRecord> {
    let candidate = load_candidate(pool, id).await?;
    require_status(&candidate, &[CandidateStatus::Undiscovered, CandidateStatus::Investigating])?;

    let repo = CandidateRepository::new(pool);
    repo.assign(id, assignee).await?;
    repo.update_status(id, CandidateStatus::Investigating.as_str(), None, None)
        .await?;
    load_candidate(pool, id).await
}

pub async fn add_note(pool: &SqlitePool, id: i64, author: &str, text: &str) -> anyhow::Result<()> {
    let candidate = load_candidate(pool, id).await?;
    let mut notes: Vec<Note> = serde_json::from_str(&candidate.notes).unwrap_or_default();
    notes.push(Note {
        at: Utc::now().timestamp(),
        author: author.to_string(),
        text: text.to_string(),
    });
    CandidateRepository::new(pool)
        .set_notes(id, &serde_json::to_string(&notes)?)
        .await?;
    Ok(())
}

pub async fn add_evidence(pool: &SqlitePool, id: i64, evidence: &str) -> anyhow::Result<()> {
    let candidate = load_candidate(pool, id).await?;
    let mut items: Vec<String> = serde_json::from_str(&candidate.evidence).unwrap_or_default();
    items.push(evidence.to_string());
    CandidateRepository::new(pool)
        .set_evidence(id, &serde_json::to_string(&items)?)
        .await?;
    Ok(())
}

/// Resolve an investigation. Confirmed or likely insiders synthesize a
/// ConfirmedInsider row from the candidate's fields.
pub async fn resolve(
    pool: &SqlitePool,
    id: i64,
    resolution: Resolution,
) -> anyhow::Result<CandidateRecord> {
    let candidate = load_candidate(pool, id).await?;
    require_status(&candidate, &[CandidateStatus::Investigating])?;

    let now = Utc::now().timestamp();
    CandidateRepository::new(pool)
        .update_status(id, CandidateStatus::Resolved.as_str(), Some(resolution.as_str()), Some(now))
        .await?;

    if resolution.is_insider() {
        let confidence = match resolution {
            Resolution::ConfirmedInsider => "confirmed",
            _ => "likely",
        };
        InsiderRepository::new(pool)
            .insert(&ConfirmedInsiderRecord {
                id: None,
                wallet_address: candidate.wallet_address.clone(),
                condition_id: Some(candidate.condition_id.clone()),
                trade_id: Some(candidate.trade_id),
                confidence_level: confidence.to_string(),
                confirmation_source: Some("investigation".to_string()),
                evidence: candidate.evidence.clone(),
                used_for_training: false,
                training_weight: 1.0,
            })
            .await?;
        info!(
            candidate_id = id,
            wallet = %candidate.wallet_address,
            confidence,
            "Insider confirmed from investigation"
        );
    }

    load_candidate(pool, id).await
}

pub async fn dismiss(pool: &SqlitePool, id: i64, reason: &str) -> anyhow::Result<CandidateRecord> {
    let candidate = load_candidate(pool, id).await?;
    require_status(
        &candidate,
        &[CandidateStatus::Undiscovered, CandidateStatus::Investigating],
    )?;

    if !reason.is_empty() {
        add_note(pool, id, "system", reason).await?;
    }
    CandidateRepository::new(pool)
        .update_status(id, CandidateStatus::Dismissed.as_str(), None, Some(Utc::now().timestamp()))
        .await?;
    load_candidate(pool, id).await
}

// ---------------------------------------------------------------------------
// Investigation profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct WalletProfile {
    pub address: String,
    pub total_trades: i64,
    pub unique_markets: i64,
    pub win_rate: Option<f64>,
    pub resolved_positions: i64,
    pub total_profit: f64,
    pub account_age_days: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub factors: Vec<String>,
    pub level: &'static str,
}

#[derive(Debug, Serialize)]
pub struct InvestigationProfile {
    pub candidate: CandidateRecord,
    pub wallet: Option<WalletProfile>,
    pub related_trades: Vec<TradeRecord>,
    /// Other scored trades on the same market above the suspicion floor
    pub market_suspects: Vec<persistence::repository::ScoredTradeRow>,
    pub similar_candidates: Vec<CandidateRecord>,
    pub risk: RiskAssessment,
}

/// Count risk factors and bucket them into a level
pub fn assess_risk(candidate: &CandidateRecord, wallet: Option<&WalletProfile>) -> RiskAssessment {
    let mut factors = Vec::new();

    if candidate.insider_probability >= 0.7 {
        factors.push(format!(
            "insider probability {:.2}",
            candidate.insider_probability
        ));
    }
    if candidate.anomaly_score >= 0.8 {
        factors.push(format!("anomaly score {:.2}", candidate.anomaly_score));
    }
    if let Some(hours) = candidate.hours_before_resolution {
        if hours <= 24.0 {
            factors.push(format!("traded {hours:.1}h before resolution"));
        }
    }
    if let Some(profit) = candidate
        .profit_loss
        .as_deref()
        .and_then(|p| p.parse::<f64>().ok())
    {
        if profit >= 1000.0 {
            factors.push(format!("realized profit {profit:.0}"));
        }
    }
    if let Some(w) = wallet {
        if w.account_age_days < 7.0 {
            factors.push(format!("wallet {:.1} days old", w.account_age_days));
        }
        if w.resolved_positions >= 5 {
            if let Some(rate) = w.win_rate {
                if rate >= 0.8 {
                    factors.push(format!("win rate {:.0}%", rate * 100.0));
                }
            }
        }
    }

    let level = match factors.len() {
        0 | 1 => "low",
        2 => "medium",
        3 | 4 => "high",
        _ => "critical",
    };
    RiskAssessment { factors, level }
}

/// Aggregate everything an investigator needs for one candidate
pub async fn build_profile(pool: &SqlitePool, candidate_id: i64) -> anyhow::Result<InvestigationProfile> {
    let candidate = load_candidate(pool, candidate_id).await?;

    let trades = TradeRepository::new(pool);
    let related_trades = trades.for_wallet(&candidate.wallet_address, 100).await?;

    let wallet = WalletRepository::new(pool)
        .get_by_address(&candidate.wallet_address)
        .await?
        .map(|w| {
            let total_profit: f64 = related_trades
                .iter()
                .filter_map(|t| t.profit_loss.as_deref())
                .filter_map(|p| p.parse::<f64>().ok())
                .sum();
            let account_age_days = match (w.first_seen_at, w.last_seen_at) {
                (Some(first), Some(last)) => (last - first).max(0) as f64 / 86_400.0,
                _ => 0.0,
            };
            WalletProfile {
                address: w.address,
                total_trades: w.total_trades,
                unique_markets: w.unique_markets,
                win_rate: w.win_rate,
                resolved_positions: w.resolved_positions,
                total_profit,
                account_age_days,
            }
        });

    let candidates = CandidateRepository::new(pool);
    let similar = candidates
        .similar(&candidate.wallet_address, candidate.market_id, candidate_id)
        .await?;

    let market_suspects = match candidate.market_id {
        Some(market_id) => {
            persistence::repository::ScoreRepository::new(pool)
                .suspicious_for_market(market_id, 0.5, candidate.trade_id, 20)
                .await?
        }
        None => Vec::new(),
    };

    let risk = assess_risk(&candidate, wallet.as_ref());

    Ok(InvestigationProfile {
        candidate,
        wallet,
        related_trades,
        market_suspects,
        similar_candidates: similar,
        risk,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{seed_market, seed_trade, SeedTrade};
    use persistence::Database;

    async fn seed_candidate(db: &Database, tx: &str, cid: &str, probability: f64) -> i64 {
        let market_id = seed_market(db, cid, "politics", Some(("Yes", 1_700_086_400)), true).await;
        let trade_id = seed_trade(
            db,
            SeedTrade {
                tx,
                market_id,
                condition_id: cid,
                wallet: "0xsuspect",
                was_correct: Some(true),
                profit: Some(2500.0),
                ..Default::default()
            },
        )
        .await;

        CandidateRepository::new(db.pool())
            .insert(&CandidateRecord {
                id: None,
                trade_id,
                score_id: None,
                market_id: Some(market_id),
                batch_id: None,
                discovery_rank: Some(1),
                anomaly_score: 0.85,
                insider_probability: probability,
                wallet_address: "0xsuspect".into(),
                condition_id: cid.into(),
                question: "Test?".into(),
                side: "BUY".into(),
                outcome: "Yes".into(),
                size: "300".into(),
                price: "0.5".into(),
                usdc_size: "150".into(),
                profit_loss: Some("2500".into()),
                hours_before_resolution: Some(12.0),
                anomaly_breakdown: "{}".into(),
                status: "undiscovered".into(),
                priority: "high".into(),
                resolution: None,
                notes: "[]".into(),
                evidence: "[]".into(),
                discovered_at: 1_700_000_000,
                resolved_at: None,
                assigned_to: None,
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_lifecycle_to_confirmed_insider() {
        let db = Database::in_memory().await.unwrap();
        let id = seed_candidate(&db, "0xlife", "0xlc", 0.9).await;

        let assigned = assign(db.pool(), id, "analyst-1").await.unwrap();
        assert_eq!(assigned.status, "investigating");
        assert_eq!(assigned.assigned_to.as_deref(), Some("analyst-1"));

        add_note(db.pool(), id, "analyst-1", "wallet funded day before").await.unwrap();
        add_evidence(db.pool(), id, "funding tx 0xfeed").await.unwrap();

        let resolved = resolve(db.pool(), id, Resolution::ConfirmedInsider).await.unwrap();
        assert_eq!(resolved.status, "resolved");
        assert_eq!(resolved.resolution.as_deref(), Some("confirmed_insider"));
        assert!(resolved.resolved_at.is_some());

        let insiders = InsiderRepository::new(db.pool()).all().await.unwrap();
        assert_eq!(insiders.len(), 1);
        assert_eq!(insiders[0].wallet_address, "0xsuspect");
        assert_eq!(insiders[0].confidence_level, "confirmed");
        assert!(!insiders[0].used_for_training);
    }

    #[tokio::test]
    async fn test_resolve_requires_investigating() {
        let db = Database::in_memory().await.unwrap();
        let id = seed_candidate(&db, "0xskip", "0xsc", 0.8).await;

        // Straight from undiscovered: rejected
        let err = resolve(db.pool(), id, Resolution::NotInsider).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_dismiss_and_no_insider_row() {
        let db = Database::in_memory().await.unwrap();
        let id = seed_candidate(&db, "0xdis", "0xdc", 0.6).await;

        let dismissed = dismiss(db.pool(), id, "benign hedging pattern").await.unwrap();
        assert_eq!(dismissed.status, "dismissed");

        // Terminal: no further transitions
        assert!(assign(db.pool(), id, "analyst").await.is_err());
        assert!(dismiss(db.pool(), id, "again").await.is_err());

        assert_eq!(InsiderRepository::new(db.pool()).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_not_insider_resolution_skips_synthesis() {
        let db = Database::in_memory().await.unwrap();
        let id = seed_candidate(&db, "0xclean", "0xcc", 0.75).await;

        assign(db.pool(), id, "analyst-2").await.unwrap();
        resolve(db.pool(), id, Resolution::NotInsider).await.unwrap();
        assert_eq!(InsiderRepository::new(db.pool()).count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_profile_aggregates_risk() {
        let db = Database::in_memory().await.unwrap();
        let id = seed_candidate(&db, "0xprof", "0xpc", 0.9).await;

        let profile = build_profile(db.pool(), id).await.unwrap();
        assert_eq!(profile.related_trades.len(), 1);
        // probability, anomaly, timing, profit all fire
        assert!(profile.risk.factors.len() >= 4);
        assert!(matches!(profile.risk.level, "high" | "critical"));
    }

    #[test]
    fn test_risk_level_buckets() {
        let candidate = CandidateRecord {
            id: None,
            trade_id: 1,
            score_id: None,
            market_id: None,
            batch_id: None,
            discovery_rank: None,
            anomaly_score: 0.1,
            insider_probability: 0.1,
            wallet_address: "0xw".into(),
            condition_id: "0xc".into(),
            question: String::new(),
            side: "BUY".into(),
            outcome: "Yes".into(),
            size: "1".into(),
            price: "0.5".into(),
            usdc_size: "0.5".into(),
            profit_loss: None,
            hours_before_resolution: None,
            anomaly_breakdown: "{}".into(),
            status: "undiscovered".into(),
            priority: "low".into(),
            resolution: None,
            notes: "[]".into(),
            evidence: "[]".into(),
            discovered_at: 0,
            resolved_at: None,
            assigned_to: None,
        };
        let risk = assess_risk(&candidate, None);
        assert!(risk.factors.is_empty());
        assert_eq!(risk.level, "low");
    }
}
