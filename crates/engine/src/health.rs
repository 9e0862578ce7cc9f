//! Data-source health monitor
//!
//! Tracks a rolling window of the last 10 call outcomes per source and
//! recommends which source to read from. Single writer: the fetchers record
//! outcomes through this handle; readers get a consistent snapshot.

use crate::bus::{EventBus, FailoverEvent};
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{info, warn};

/// Rolling window size per source
const WINDOW_SIZE: usize = 10;
/// Success rate at or above which a source is healthy
const HEALTHY_THRESHOLD: f64 = 0.8;
/// Seconds between health probes
pub const PROBE_INTERVAL_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Api,
    Subgraph,
}

impl SourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Subgraph => "subgraph",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug)]
struct SourceState {
    window: VecDeque<bool>,
    status: SourceStatus,
    last_success: Option<i64>,
    last_failure: Option<i64>,
    last_failure_reason: Option<String>,
}

impl SourceState {
    fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_SIZE),
            status: SourceStatus::Unknown,
            last_success: None,
            last_failure: None,
            last_failure_reason: None,
        }
    }

    fn record(&mut self, ok: bool) {
        if self.window.len() == WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(ok);
    }

    /// Empty window counts as healthy (optimistic)
    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let successes = self.window.iter().filter(|ok| **ok).count();
        successes as f64 / self.window.len() as f64
    }

    fn is_healthy(&self) -> bool {
        self.success_rate() >= HEALTHY_THRESHOLD
    }
}

/// Snapshot of one source's health
#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub source: SourceKind,
    pub status: SourceStatus,
    pub success_rate: f64,
    pub window_size: usize,
    pub last_success: Option<i64>,
    pub last_failure: Option<i64>,
    pub last_failure_reason: Option<String>,
}

/// Snapshot of both sources plus the recommendation
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub api: SourceHealth,
    pub subgraph: SourceHealth,
    pub recommended: SourceKind,
}

pub struct HealthMonitor {
    api: RwLock<SourceState>,
    subgraph: RwLock<SourceState>,
    bus: EventBus,
}

impl HealthMonitor {
    pub fn new(bus: EventBus) -> Self {
        Self {
            api: RwLock::new(SourceState::new()),
            subgraph: RwLock::new(SourceState::new()),
            bus,
        }
    }

    fn state(&self, source: SourceKind) -> &RwLock<SourceState> {
        match source {
            SourceKind::Api => &self.api,
            SourceKind::Subgraph => &self.subgraph,
        }
    }

    pub fn record_success(&self, source: SourceKind) {
        let mut state = self.state(source).write().unwrap();
        state.record(true);
        state.last_success = Some(Utc::now().timestamp());
        self.transition(source, &mut state);
    }

    pub fn record_failure(&self, source: SourceKind, reason: &str) {
        let mut state = self.state(source).write().unwrap();
        state.record(false);
        state.last_failure = Some(Utc::now().timestamp());
        state.last_failure_reason = Some(reason.to_string());
        self.transition(source, &mut state);
    }

    fn transition(&self, source: SourceKind, state: &mut SourceState) {
        let next = if state.is_healthy() {
            SourceStatus::Healthy
        } else {
            SourceStatus::Unhealthy
        };
        if next != state.status {
            match next {
                SourceStatus::Unhealthy => warn!(
                    source = source.name(),
                    success_rate = state.success_rate(),
                    "Data source unhealthy"
                ),
                _ => info!(
                    source = source.name(),
                    success_rate = state.success_rate(),
                    "Data source healthy"
                ),
            }
            state.status = next;
        }
    }

    pub fn is_healthy(&self, source: SourceKind) -> bool {
        self.state(source).read().unwrap().is_healthy()
    }

    pub fn success_rate(&self, source: SourceKind) -> f64 {
        self.state(source).read().unwrap().success_rate()
    }

    /// The subgraph is the reference authority for blockchain state, so it
    /// wins when healthy and is the optimistic default when neither is.
    pub fn recommended_source(&self) -> SourceKind {
        if self.is_healthy(SourceKind::Subgraph) {
            SourceKind::Subgraph
        } else if self.is_healthy(SourceKind::Api) {
            SourceKind::Api
        } else {
            SourceKind::Subgraph
        }
    }

    pub fn health_summary(&self) -> HealthSummary {
        let snapshot = |source: SourceKind| {
            let state = self.state(source).read().unwrap();
            SourceHealth {
                source,
                status: state.status,
                success_rate: state.success_rate(),
                window_size: state.window.len(),
                last_success: state.last_success,
                last_failure: state.last_failure,
                last_failure_reason: state.last_failure_reason.clone(),
            }
        };
        HealthSummary {
            api: snapshot(SourceKind::Api),
            subgraph: snapshot(SourceKind::Subgraph),
            recommended: self.recommended_source(),
        }
    }

    /// Announce a failover on the bus
    pub fn publish_failover(&self, from: SourceKind, to: SourceKind, reason: &str) {
        self.bus.publish_failover(FailoverEvent {
            from: from.name().to_string(),
            to: to.name().to_string(),
            reason: reason.to_string(),
            timestamp: Utc::now().timestamp(),
        });
    }
}

/// Periodic probe loop: issues a light request against each source every
/// two minutes and records the outcome. Cancelled cooperatively.
pub async fn run_health_probes(
    api: &crate::api::DataApiClient,
    subgraph: &crate::api::SubgraphClient,
    monitor: &HealthMonitor,
    cancelled: &AtomicBool,
) {
    info!(interval_secs = PROBE_INTERVAL_SECS, "Health probe loop starting");

    loop {
        if cancelled.load(Ordering::Relaxed) {
            info!("Health probe loop cancelled");
            return;
        }

        match api.probe().await {
            Ok(()) => monitor.record_success(SourceKind::Api),
            Err(e) => monitor.record_failure(SourceKind::Api, &e.to_string()),
        }

        match subgraph.meta().await {
            Ok(_) => monitor.record_success(SourceKind::Subgraph),
            Err(e) => monitor.record_failure(SourceKind::Subgraph, &e.to_string()),
        }

        // Sleep in slices so cancellation lands within half a second
        for _ in 0..(PROBE_INTERVAL_SECS * 2) {
            if cancelled.load(Ordering::Relaxed) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(EventBus::new())
    }

    #[test]
    fn test_empty_window_is_healthy() {
        let m = monitor();
        assert!(m.is_healthy(SourceKind::Api));
        assert!(m.is_healthy(SourceKind::Subgraph));
        assert_eq!(m.success_rate(SourceKind::Api), 1.0);
    }

    #[test]
    fn test_recommended_prefers_subgraph() {
        let m = monitor();
        assert_eq!(m.recommended_source(), SourceKind::Subgraph);
    }

    #[test]
    fn test_unhealthy_after_three_failures_in_window() {
        let m = monitor();
        // 7 successes, 3 failures -> 0.7 < 0.8
        for _ in 0..7 {
            m.record_success(SourceKind::Api);
        }
        for _ in 0..3 {
            m.record_failure(SourceKind::Api, "rate limited");
        }
        assert!(!m.is_healthy(SourceKind::Api));
        assert!((m.success_rate(SourceKind::Api) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_falls_back_to_api_when_subgraph_down() {
        let m = monitor();
        for _ in 0..10 {
            m.record_failure(SourceKind::Subgraph, "timeout");
        }
        m.record_success(SourceKind::Api);
        assert_eq!(m.recommended_source(), SourceKind::Api);
    }

    #[test]
    fn test_optimistic_default_when_both_down() {
        let m = monitor();
        for _ in 0..10 {
            m.record_failure(SourceKind::Subgraph, "timeout");
            m.record_failure(SourceKind::Api, "timeout");
        }
        assert_eq!(m.recommended_source(), SourceKind::Subgraph);
    }

    #[test]
    fn test_window_rolls_off_old_outcomes() {
        let m = monitor();
        for _ in 0..10 {
            m.record_failure(SourceKind::Api, "down");
        }
        assert!(!m.is_healthy(SourceKind::Api));
        // 10 fresh successes push all failures out of the window
        for _ in 0..10 {
            m.record_success(SourceKind::Api);
        }
        assert!(m.is_healthy(SourceKind::Api));
        assert_eq!(m.success_rate(SourceKind::Api), 1.0);
    }

    #[test]
    fn test_summary_reports_both_sources() {
        let m = monitor();
        m.record_success(SourceKind::Api);
        m.record_failure(SourceKind::Subgraph, "indexing errors");
        let summary = m.health_summary();
        assert_eq!(summary.api.status, SourceStatus::Healthy);
        assert_eq!(summary.subgraph.window_size, 1);
        assert!(summary.subgraph.last_failure_reason.is_some());
    }
}
