//! Trade monitor — poll, score, threshold, alert
//!
//! Polls for trades newer than its cursor, scores each, and emits an alert
//! when either threshold trips. The poll cursor is confined to this process;
//! alerts are persisted and broadcast on `polymarket:alerts`.

use crate::bus::{AlertEvent, EventBus};
use crate::scorer::Scorer;
use chrono::Utc;
use persistence::repository::{AlertRecord, AlertRepository, TradeRecord, TradeRepository, TradeScoreRecord};
use persistence::SqlitePool;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::{error, info, warn};

const MAX_RECENT_ALERTS: usize = 50;

/// Runtime-configurable monitor settings
#[derive(Debug, Clone, Serialize)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub poll_interval_secs: u64,
    pub anomaly_threshold: f64,
    pub probability_threshold: f64,
    pub batch_limit: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: 30,
            anomaly_threshold: 0.7,
            probability_threshold: 0.7,
            batch_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorStatus {
    Idle,
    Watching,
    Error,
}

/// Shared progress/state for the monitor (single writer: the poll loop)
pub struct MonitorProgress {
    pub status: RwLock<MonitorStatus>,
    pub cancelled: AtomicBool,
    pub config: RwLock<MonitorConfig>,
    /// Poll cursor: the newest trade_timestamp seen
    pub last_seen: AtomicI64,
    pub polls: AtomicU64,
    pub alerts_emitted: AtomicU64,
    pub recent_alerts: RwLock<Vec<AlertRecord>>,
    pub error_message: RwLock<Option<String>>,
}

impl MonitorProgress {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            status: RwLock::new(MonitorStatus::Idle),
            cancelled: AtomicBool::new(false),
            config: RwLock::new(config),
            last_seen: AtomicI64::new(0),
            polls: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
            recent_alerts: RwLock::new(Vec::new()),
            error_message: RwLock::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.status.read().unwrap(), MonitorStatus::Watching)
    }

    pub fn set_config(&self, config: MonitorConfig) {
        *self.config.write().unwrap() = config;
    }

    fn push_alert(&self, alert: AlertRecord) {
        let mut alerts = self.recent_alerts.write().unwrap();
        alerts.insert(0, alert);
        alerts.truncate(MAX_RECENT_ALERTS);
    }

    pub fn status_report(&self) -> MonitorReport {
        MonitorReport {
            status: *self.status.read().unwrap(),
            config: self.config.read().unwrap().clone(),
            last_seen: self.last_seen.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            error_message: self.error_message.read().unwrap().clone(),
        }
    }
}

impl Default for MonitorProgress {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub status: MonitorStatus,
    pub config: MonitorConfig,
    pub last_seen: i64,
    pub polls: u64,
    pub alerts_emitted: u64,
    pub error_message: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PollSummary {
    pub trades_seen: u64,
    pub alerts_created: u64,
    pub errors: u64,
}

// ---------------------------------------------------------------------------
// Alert derivation
// ---------------------------------------------------------------------------

/// Severity from insider probability (same cutoffs as candidate priority)
pub fn severity_for(probability: f64) -> &'static str {
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

/// Alert type from the triggers that fired; several at once is `combined`
pub fn derive_alert_type(score: &TradeScoreRecord, anomaly_threshold: f64) -> Option<&'static str> {
    let matched: std::collections::HashMap<String, f64> =
        serde_json::from_str(&score.matched_patterns).unwrap_or_default();

    let mut triggers: Vec<&'static str> = Vec::new();
    if !matched.is_empty() {
        triggers.push("pattern_match");
    }
    if score.size_zscore.map(|z| z.abs() >= 3.0).unwrap_or(false) {
        triggers.push("whale_trade");
    }
    if score.timing_zscore.map(|z| z.abs() >= 2.5).unwrap_or(false) {
        triggers.push("timing_suspicious");
    }
    if score.anomaly_score >= anomaly_threshold {
        triggers.push("anomaly_threshold");
    }

    match triggers.as_slice() {
        [] => None,
        [single] => Some(*single),
        _ => Some("combined"),
    }
}

fn new_alert_id() -> String {
    let suffix: u64 = rand::random();
    format!("alert_{suffix:016x}")
}

fn build_alert(trade: &TradeRecord, score: &TradeScoreRecord, alert_type: &str, question: Option<String>) -> AlertRecord {
    AlertRecord {
        id: None,
        alert_id: new_alert_id(),
        alert_type: alert_type.to_string(),
        severity: severity_for(score.insider_probability).to_string(),
        status: "new".into(),
        trade_id: trade.id,
        wallet_address: Some(trade.wallet_address.clone()),
        condition_id: Some(trade.condition_id.clone()),
        question,
        anomaly_score: Some(score.anomaly_score),
        insider_probability: Some(score.insider_probability),
        matched_patterns: score.matched_patterns.clone(),
        context: serde_json::json!({
            "side": trade.side,
            "outcome": trade.outcome,
            "size": trade.size,
            "price": trade.price,
            "usdc_size": trade.usdc_size,
            "trade_timestamp": trade.trade_timestamp,
        })
        .to_string(),
        triggered_at: Utc::now().timestamp(),
        acknowledged_at: None,
        resolved_at: None,
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// One manual or scheduled poll: score new trades and alert on threshold.
pub async fn poll_once(
    pool: &SqlitePool,
    progress: &MonitorProgress,
    bus: &EventBus,
) -> anyhow::Result<PollSummary> {
    let config = progress.config.read().unwrap().clone();
    let cursor = progress.last_seen.load(Ordering::Relaxed);

    let trades = TradeRepository::new(pool)
        .newer_than(cursor, config.batch_limit)
        .await?;
    let mut summary = PollSummary {
        trades_seen: trades.len() as u64,
        ..Default::default()
    };
    if trades.is_empty() {
        progress.polls.fetch_add(1, Ordering::Relaxed);
        return Ok(summary);
    }

    let scorer = Scorer::load(pool).await?;
    let alerts = AlertRepository::new(pool);
    let markets = persistence::repository::MarketRepository::new(pool);
    let mut max_seen = cursor;

    for trade in &trades {
        max_seen = max_seen.max(trade.trade_timestamp);

        let score = match scorer.score_trade(trade).await {
            Ok(score) => score,
            Err(e) => {
                summary.errors += 1;
                warn!(error = %e, tx = %trade.transaction_hash, "Monitor scoring failed");
                continue;
            }
        };

        let tripped = score.anomaly_score >= config.anomaly_threshold
            || score.insider_probability >= config.probability_threshold;
        if !tripped {
            continue;
        }
        let Some(alert_type) = derive_alert_type(&score, config.anomaly_threshold) else {
            continue;
        };

        let question = markets
            .get_by_id(trade.market_id)
            .await
            .ok()
            .flatten()
            .map(|m| m.question);
        let mut alert = build_alert(trade, &score, alert_type, question);

        match alerts.insert(&alert).await {
            Ok(id) => {
                alert.id = Some(id);
                info!(
                    alert_id = %alert.alert_id,
                    alert_type = %alert.alert_type,
                    severity = %alert.severity,
                    wallet = %trade.wallet_address,
                    "Alert raised"
                );
                bus.publish_alert(AlertEvent { alert: alert.clone() });
                progress.push_alert(alert);
                progress.alerts_emitted.fetch_add(1, Ordering::Relaxed);
                summary.alerts_created += 1;
            }
            Err(e) => {
                // Log and keep processing; delivery failures are not fatal
                summary.errors += 1;
                error!(error = %e, "Alert persist failed");
            }
        }
    }

    progress.last_seen.store(max_seen, Ordering::Relaxed);
    progress.polls.fetch_add(1, Ordering::Relaxed);
    Ok(summary)
}

/// Long-running poll loop with cooperative cancellation
pub async fn run_trade_monitor(pool: SqlitePool, progress: &MonitorProgress, bus: &EventBus) {
    info!("Trade monitor starting");
    *progress.status.write().unwrap() = MonitorStatus::Watching;

    // Start the cursor at the newest existing trade so only fresh fills alert
    if progress.last_seen.load(Ordering::Relaxed) == 0 {
        if let Ok(Some(latest)) = TradeRepository::new(&pool).latest_timestamp().await {
            progress.last_seen.store(latest, Ordering::Relaxed);
        }
    }

    loop {
        if progress.cancelled.load(Ordering::Relaxed) {
            info!("Trade monitor cancelled");
            break;
        }

        let (enabled, interval) = {
            let config = progress.config.read().unwrap();
            (config.enabled, config.poll_interval_secs)
        };

        if enabled {
            match poll_once(&pool, progress, bus).await {
                Ok(summary) => {
                    if summary.alerts_created > 0 {
                        info!(
                            trades = summary.trades_seen,
                            alerts = summary.alerts_created,
                            "Poll round finished"
                        );
                    }
                    *progress.error_message.write().unwrap() = None;
                }
                Err(e) => {
                    warn!(error = %e, "Poll round failed");
                    *progress.error_message.write().unwrap() = Some(e.to_string());
                }
            }
        }

        // Sleep in slices so cancellation lands promptly
        for _ in 0..(interval * 2) {
            if progress.cancelled.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    *progress.status.write().unwrap() = MonitorStatus::Idle;
    info!("Trade monitor stopped");
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

    fn score_with(
        size_z: Option<f64>,
        timing_z: Option<f64>,
        anomaly: f64,
        matched: &str,
    ) -> TradeScoreRecord {
        TradeScoreRecord {
            id: None,
            trade_id: 1,
            size_zscore: size_z,
            timing_zscore: timing_z,
            wallet_age_zscore: None,
            wallet_activity_zscore: None,
            price_extremity_zscore: None,
            position_concentration_zscore: None,
            funding_proximity_zscore: None,
            anomaly_score: anomaly,
            insider_probability: 0.5,
            trinity_pattern: false,
            matched_patterns: matched.into(),
            score_breakdown: "{}".into(),
            scored_at: 0,
            score_mode: None,
        }
    }

    #[test]
    fn test_alert_type_single_triggers() {
        let score = score_with(Some(3.5), None, 0.1, "{}");
        assert_eq!(derive_alert_type(&score, 0.7), Some("whale_trade"));

        let score = score_with(None, Some(-2.6), 0.1, "{}");
        assert_eq!(derive_alert_type(&score, 0.7), Some("timing_suspicious"));

        let score = score_with(None, None, 0.8, "{}");
        assert_eq!(derive_alert_type(&score, 0.7), Some("anomaly_threshold"));

        let score = score_with(None, None, 0.1, "{\"whale_trade\": 1.0}");
        assert_eq!(derive_alert_type(&score, 0.7), Some("pattern_match"));
    }

    #[test]
    fn test_alert_type_combined() {
        let score = score_with(Some(3.5), Some(-2.6), 0.9, "{\"whale_trade\": 1.0}");
        assert_eq!(derive_alert_type(&score, 0.7), Some("combined"));
    }

    #[test]
    fn test_alert_type_none_when_nothing_fires() {
        let score = score_with(Some(1.0), Some(0.5), 0.1, "{}");
        assert_eq!(derive_alert_type(&score, 0.7), None);
    }

    #[test]
    fn test_severity_cutoffs() {
        assert_eq!(severity_for(0.95), "critical");
        assert_eq!(severity_for(0.75), "high");
        assert_eq!(severity_for(0.55), "medium");
        assert_eq!(severity_for(0.2), "low");
    }

    #[tokio::test]
    async fn test_poll_alerts_on_whale_and_advances_cursor() {
        let db = Database::in_memory().await.unwrap();
        seed_baseline(&db, "politics", "size", 100.0, 50.0).await;
        seed_default_patterns(db.pool()).await.unwrap();

        let market_id = seed_market(&db, "0xmon", "politics", Some(("Yes", 1_700_086_400)), true).await;
        seed_trade(
            &db,
            SeedTrade {
                tx: "0xbig",
                market_id,
                condition_id: "0xmon",
                size: 400.0,
                ts: 1_700_000_000,
                was_correct: Some(true),
                ..Default::default()
            },
        )
        .await;

        let progress = MonitorProgress::default();
        let bus = EventBus::new();
        let mut rx = bus.subscribe_alerts();

        let summary = poll_once(db.pool(), &progress, &bus).await.unwrap();
        assert_eq!(summary.trades_seen, 1);
        assert_eq!(summary.alerts_created, 1);
        assert_eq!(progress.last_seen.load(Ordering::Relaxed), 1_700_000_000);

        // Broadcast observed
        let event = rx.recv().await.unwrap();
        assert!(event.alert.alert_id.starts_with("alert_"));
        assert_eq!(event.alert.status, "new");

        // Persisted
        assert_eq!(AlertRepository::new(db.pool()).count().await.unwrap(), 1);

        // Second poll sees nothing new
        let summary = poll_once(db.pool(), &progress, &bus).await.unwrap();
        assert_eq!(summary.trades_seen, 0);
        assert_eq!(summary.alerts_created, 0);
    }

    #[tokio::test]
    async fn test_poll_quiet_trade_no_alert() {
        let db = Database::in_memory().await.unwrap();
        seed_baseline(&db, "politics", "size", 100.0, 50.0).await;

        let market_id = seed_market(&db, "0xquiet", "politics", None, true).await;
        seed_trade(
            &db,
            SeedTrade {
                tx: "0xsmall",
                market_id,
                condition_id: "0xquiet",
                size: 100.0,
                was_correct: None,
                hours_before: None,
                ..Default::default()
            },
        )
        .await;

        let progress = MonitorProgress::default();
        let bus = EventBus::new();
        let summary = poll_once(db.pool(), &progress, &bus).await.unwrap();
        assert_eq!(summary.trades_seen, 1);
        assert_eq!(summary.alerts_created, 0);
    }
}
