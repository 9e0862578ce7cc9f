//! Poly Sentinel Engine — insider-trading detection for prediction markets
//!
//! Provides:
//! - Dual-source collectors (centralized API + GraphQL subgraph) with
//!   health-driven failover
//! - Token-to-market resolution with stub creation and later enrichment
//! - Statistical baselines, per-trade anomaly scoring, and a rule engine
//! - Discovery of investigation candidates, real-time alerting, and the
//!   confirmed-insider feedback loop

pub mod api;
pub mod baseline;
pub mod bus;
pub mod collector;
pub mod discovery;
pub mod enrich;
pub mod feedback;
pub mod health;
pub mod ingest;
pub mod investigation;
pub mod monitor;
pub mod patterns;
pub mod scorer;
pub mod token_map;

#[cfg(test)]
mod testutil;

// Re-exports for convenience
pub use api::{DataApiClient, FetchError, SubgraphClient};
pub use baseline::{compute_baselines, compute_insider_baselines, BaselineSummary};
pub use bus::{AlertEvent, EventBus, FailoverEvent};
pub use collector::{TradeBatch, TradeCollector};
pub use discovery::{run_discovery, DiscoveryOutcome, DiscoveryRequest};
pub use enrich::{enrich_stub_markets, sync_markets, EnrichSummary, SyncSummary};
pub use feedback::{run_feedback_iteration, FeedbackOptions, FeedbackReport, Improvement};
pub use health::{run_health_probes, HealthMonitor, HealthSummary, SourceKind, SourceStatus};
pub use ingest::{IngestSummary, Ingestor};
pub use investigation::{build_profile, CandidateStatus, InvestigationProfile, Resolution};
pub use monitor::{poll_once, run_trade_monitor, MonitorConfig, MonitorProgress, MonitorStatus};
pub use patterns::{seed_default_patterns, validate_patterns, ValidationSummary};
pub use scorer::{ScoreSummary, Scorer};
pub use token_map::{build_local_mapping, build_subgraph_mapping, TokenMapping};
