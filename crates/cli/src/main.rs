//! Poly-Sentinel — insider-trading detection for a prediction-market venue
//!
//! Usage:
//!   poly-sentinel sync-markets --max 500        — Pull market metadata
//!   poly-sentinel ingest --source api --failover — Ingest recent trades
//!   poly-sentinel baselines                      — Recompute baselines
//!   poly-sentinel score                          — Score unscored trades
//!   poly-sentinel discover                       — Promote candidates
//!   poly-sentinel monitor                        — Run the alert loop
//!   poly-sentinel feedback --rescore             — One feedback iteration

use clap::{Parser, Subcommand};
use engine::{
    build_local_mapping, build_subgraph_mapping, enrich_stub_markets, poll_once, run_discovery,
    run_feedback_iteration, run_health_probes, run_trade_monitor, seed_default_patterns,
    sync_markets, validate_patterns, DataApiClient, DiscoveryRequest, EventBus, FeedbackOptions,
    HealthMonitor, Ingestor, MonitorConfig, MonitorProgress, Resolution, Scorer, SourceKind,
    SubgraphClient, TradeBatch, TradeCollector,
};
use persistence::repository::{CandidateRepository, WalletRepository};
use persistence::Database;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "poly-sentinel")]
#[command(about = "Insider-trading detection for a prediction-market venue", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync market metadata from the gamma host
    SyncMarkets {
        /// Maximum markets to pull
        #[arg(long, default_value_t = 500)]
        max: usize,
        /// Include inactive/closed markets
        #[arg(long)]
        all: bool,
    },
    /// Ingest recent trades from the API or the subgraph
    Ingest {
        /// Source: api | subgraph
        #[arg(long, default_value = "api")]
        source: String,
        /// Maximum trades per fetch
        #[arg(long, default_value_t = 500)]
        limit: u32,
        /// Fail over to the subgraph when the API is down
        #[arg(long)]
        failover: bool,
        /// Only events at or after this unix timestamp (subgraph)
        #[arg(long)]
        since: Option<i64>,
    },
    /// Enrich stub markets via the subgraph token map
    Enrich,
    /// Recompute statistical baselines (normal + insider tracks)
    Baselines,
    /// Score trades against the baselines
    Score {
        /// Re-score every trade instead of only unscored ones
        #[arg(long)]
        rescore: bool,
        /// Batch size per scoring page
        #[arg(long, default_value_t = 500)]
        batch: i64,
    },
    /// Validate patterns against the confirmed-insider labels
    Validate,
    /// Run a discovery pass and promote candidates
    Discover {
        #[arg(long, default_value_t = 0.5)]
        min_anomaly: f64,
        #[arg(long, default_value_t = 0.7)]
        min_probability: f64,
        /// Minimum realized profit filter
        #[arg(long)]
        min_profit: Option<f64>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// List and work investigation candidates
    Candidates {
        #[command(subcommand)]
        command: CandidateCommands,
    },
    /// Run one feedback iteration
    Feedback {
        /// Also re-score all trades (expensive)
        #[arg(long)]
        rescore: bool,
    },
    /// Run the real-time monitor and health probes until interrupted
    Monitor {
        #[arg(long, default_value_t = 30)]
        interval: u64,
        #[arg(long, default_value_t = 0.7)]
        anomaly_threshold: f64,
        #[arg(long, default_value_t = 0.7)]
        probability_threshold: f64,
        /// Run a single poll instead of the loop
        #[arg(long)]
        once: bool,
    },
    /// Show row counts across the detection pipeline
    Status,
    /// List or work recent alerts
    Alerts {
        #[command(subcommand)]
        command: AlertCommands,
    },
    /// Force a health check against both sources
    Health,
}

#[derive(Subcommand)]
enum AlertCommands {
    /// List recent alerts
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Acknowledge an alert
    Ack { alert_id: String },
    /// Resolve an alert
    Resolve { alert_id: String },
    /// Dismiss an alert
    Dismiss { alert_id: String },
}

#[derive(Subcommand)]
enum CandidateCommands {
    /// List candidates, optionally by status
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show the full investigation profile for one candidate
    Show { id: i64 },
    /// Assign a candidate to an investigator
    Assign { id: i64, assignee: String },
    /// Add an investigation note
    Note { id: i64, text: String },
    /// Resolve: confirmed_insider | likely_insider | not_insider | insufficient_evidence
    Resolve { id: i64, resolution: String },
    /// Dismiss a candidate
    Dismiss {
        id: i64,
        #[arg(long, default_value = "")]
        reason: String,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,poly_sentinel=debug")
    } else {
        EnvFilter::new("info,engine=info,poly_sentinel=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("DATABASE_PATH").unwrap_or_else(|_| "data/sentinel.db".to_string())
}

fn api_client() -> DataApiClient {
    let proxy = std::env::var("EGRESS_PROXY_URL").ok();
    DataApiClient::new(proxy.as_deref())
}

fn subgraph_client() -> SubgraphClient {
    let url = std::env::var("SUBGRAPH_URL").ok();
    SubgraphClient::new(url.as_deref())
}

fn print_summary(value: &impl serde::Serialize) {
    println!("{}", serde_json::to_string_pretty(value).expect("summary serializes"));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::SyncMarkets { max, all } => cmd_sync_markets(max, all).await?,
        Commands::Ingest {
            source,
            limit,
            failover,
            since,
        } => cmd_ingest(&source, limit, failover, since).await?,
        Commands::Enrich => cmd_enrich().await?,
        Commands::Baselines => cmd_baselines().await?,
        Commands::Score { rescore, batch } => cmd_score(rescore, batch).await?,
        Commands::Validate => cmd_validate().await?,
        Commands::Discover {
            min_anomaly,
            min_probability,
            min_profit,
            limit,
        } => cmd_discover(min_anomaly, min_probability, min_profit, limit).await?,
        Commands::Candidates { command } => cmd_candidates(command).await?,
        Commands::Feedback { rescore } => cmd_feedback(rescore).await?,
        Commands::Monitor {
            interval,
            anomaly_threshold,
            probability_threshold,
            once,
        } => cmd_monitor(interval, anomaly_threshold, probability_threshold, once).await?,
        Commands::Status => {
            let db = Database::new(db_path()).await?;
            print_summary(&db.stats().await?);
        }
        Commands::Alerts { command } => cmd_alerts(command).await?,
        Commands::Health => cmd_health().await?,
    }

    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_sync_markets(max: usize, all: bool) -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    let api = api_client();
    let summary = sync_markets(db.pool(), &api, max, !all, &AtomicBool::new(false)).await;
    print_summary(&summary);
    Ok(())
}

async fn cmd_ingest(source: &str, limit: u32, failover: bool, since: Option<i64>) -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    let api = api_client();
    let subgraph = subgraph_client();
    let bus = EventBus::new();
    let health = Arc::new(HealthMonitor::new(bus));
    let collector = TradeCollector::new(api.clone(), subgraph.clone(), health);
    let ingestor = Ingestor::new(db.pool());

    let summary = match source {
        "subgraph" => {
            let filter = engine::api::subgraph::OrderFilledFilter {
                from_ts: since,
                ..Default::default()
            };
            let events = collector.fetch_subgraph_window(&filter, limit, 0).await?;
            info!(count = events.len(), "Subgraph events fetched");
            let local_map = build_local_mapping(db.pool(), true).await?;
            let subgraph_map =
                build_subgraph_mapping(&subgraph, 50_000, &AtomicBool::new(false)).await?;
            ingestor
                .ingest_subgraph_events(&events, &local_map, Some(&subgraph_map))
                .await
        }
        _ => {
            let batch = collector.fetch_recent(limit, since, failover).await?;
            info!(source = batch.source().name(), count = batch.len(), "Trades fetched");
            match batch {
                TradeBatch::Api(trades) => ingestor.ingest_api_trades(Some(&api), &trades).await,
                TradeBatch::Subgraph(events) => {
                    let local_map = build_local_mapping(db.pool(), true).await?;
                    ingestor.ingest_subgraph_events(&events, &local_map, None).await
                }
            }
        }
    };

    // Wallet aggregates are eventually consistent; refresh after the batch
    let refreshed = WalletRepository::new(db.pool())
        .refresh_all_aggregates(chrono::Utc::now().timestamp())
        .await?;
    info!(wallets = refreshed, "Wallet aggregates refreshed");

    print_summary(&summary);
    Ok(())
}

async fn cmd_enrich() -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    let api = api_client();
    let subgraph = subgraph_client();
    let subgraph_map = build_subgraph_mapping(&subgraph, 50_000, &AtomicBool::new(false)).await?;
    let summary = enrich_stub_markets(db.pool(), Some(&api), &subgraph_map).await;
    print_summary(&summary);
    Ok(())
}

async fn cmd_baselines() -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    let mut summary = engine::compute_baselines(db.pool()).await;
    let insider = engine::compute_insider_baselines(db.pool()).await;
    summary.insider_computed = insider.insider_computed;
    summary.insider_insufficient = insider.insider_insufficient;
    summary.errors += insider.errors;
    print_summary(&summary);
    Ok(())
}

async fn cmd_score(rescore: bool, batch: i64) -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    seed_default_patterns(db.pool()).await?;
    let scorer = Scorer::load(db.pool()).await?;
    let cancelled = AtomicBool::new(false);

    let summary = if rescore {
        scorer.rescore_all(batch, &cancelled).await
    } else {
        scorer.score_unscored(batch, &cancelled).await
    };
    print_summary(&summary);
    Ok(())
}

async fn cmd_validate() -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    seed_default_patterns(db.pool()).await?;
    let summary = validate_patterns(db.pool()).await?;
    print_summary(&summary);
    Ok(())
}

async fn cmd_discover(
    min_anomaly: f64,
    min_probability: f64,
    min_profit: Option<f64>,
    limit: usize,
) -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    let outcome = run_discovery(
        db.pool(),
        &DiscoveryRequest {
            min_anomaly_score: min_anomaly,
            min_insider_probability: min_probability,
            min_profit,
            limit,
            notes: None,
        },
    )
    .await?;
    print_summary(&outcome);
    Ok(())
}

async fn cmd_candidates(command: CandidateCommands) -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;

    match command {
        CandidateCommands::List { status, limit } => {
            let candidates = CandidateRepository::new(db.pool())
                .list(status.as_deref(), limit)
                .await?;
            print_summary(&candidates);
        }
        CandidateCommands::Show { id } => {
            let profile = engine::build_profile(db.pool(), id).await?;
            print_summary(&profile);
        }
        CandidateCommands::Assign { id, assignee } => {
            let candidate = engine::investigation::assign(db.pool(), id, &assignee).await?;
            print_summary(&candidate);
        }
        CandidateCommands::Note { id, text } => {
            engine::investigation::add_note(db.pool(), id, "operator", &text).await?;
            print_summary(&serde_json::json!({ "ok": true, "candidate_id": id }));
        }
        CandidateCommands::Resolve { id, resolution } => {
            let resolution = Resolution::parse(&resolution)
                .ok_or_else(|| anyhow::anyhow!("unknown resolution: {resolution}"))?;
            let candidate = engine::investigation::resolve(db.pool(), id, resolution).await?;
            print_summary(&candidate);
        }
        CandidateCommands::Dismiss { id, reason } => {
            let candidate = engine::investigation::dismiss(db.pool(), id, &reason).await?;
            print_summary(&candidate);
        }
    }
    Ok(())
}

async fn cmd_feedback(rescore: bool) -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    seed_default_patterns(db.pool()).await?;
    let report = run_feedback_iteration(
        db.pool(),
        &FeedbackOptions {
            rescore,
            ..Default::default()
        },
        &AtomicBool::new(false),
    )
    .await?;
    print_summary(&report);
    Ok(())
}

async fn cmd_monitor(
    interval: u64,
    anomaly_threshold: f64,
    probability_threshold: f64,
    once: bool,
) -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    seed_default_patterns(db.pool()).await?;

    let bus = EventBus::new();
    let progress = Arc::new(MonitorProgress::new(MonitorConfig {
        enabled: true,
        poll_interval_secs: interval,
        anomaly_threshold,
        probability_threshold,
        ..Default::default()
    }));

    if once {
        let summary = poll_once(db.pool(), &progress, &bus).await?;
        print_summary(&summary);
        return Ok(());
    }

    let health = Arc::new(HealthMonitor::new(bus.clone()));
    let probe_cancel = Arc::new(AtomicBool::new(false));

    let api = api_client();
    let subgraph = subgraph_client();
    let probe_handle = {
        let health = health.clone();
        let cancel = probe_cancel.clone();
        tokio::spawn(async move { run_health_probes(&api, &subgraph, &health, &cancel).await })
    };

    let monitor_handle = {
        let pool = db.pool_clone();
        let progress = progress.clone();
        let bus = bus.clone();
        tokio::spawn(async move { run_trade_monitor(pool, &progress, &bus).await })
    };

    info!("Monitor running; Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    warn!("Interrupt received, shutting down");

    progress.cancelled.store(true, Ordering::Relaxed);
    probe_cancel.store(true, Ordering::Relaxed);
    let _ = monitor_handle.await;
    let _ = probe_handle.await;

    print_summary(&progress.status_report());
    Ok(())
}

async fn cmd_alerts(command: AlertCommands) -> anyhow::Result<()> {
    let db = Database::new(db_path()).await?;
    let repo = persistence::repository::AlertRepository::new(db.pool());
    let now = chrono::Utc::now().timestamp();

    match command {
        AlertCommands::List { limit } => {
            let alerts = repo.recent(limit).await?;
            print_summary(&alerts);
        }
        AlertCommands::Ack { alert_id } => {
            repo.update_status(&alert_id, "acknowledged", Some(now), None).await?;
            print_summary(&repo.get_by_alert_id(&alert_id).await?);
        }
        AlertCommands::Resolve { alert_id } => {
            repo.update_status(&alert_id, "resolved", None, Some(now)).await?;
            print_summary(&repo.get_by_alert_id(&alert_id).await?);
        }
        AlertCommands::Dismiss { alert_id } => {
            repo.update_status(&alert_id, "dismissed", None, Some(now)).await?;
            print_summary(&repo.get_by_alert_id(&alert_id).await?);
        }
    }
    Ok(())
}

async fn cmd_health() -> anyhow::Result<()> {
    let api = api_client();
    let subgraph = subgraph_client();
    let bus = EventBus::new();
    let monitor = HealthMonitor::new(bus);

    match api.probe().await {
        Ok(()) => monitor.record_success(SourceKind::Api),
        Err(e) => monitor.record_failure(SourceKind::Api, &e.to_string()),
    }
    match subgraph.meta().await {
        Ok(meta) => {
            if meta.has_indexing_errors {
                monitor.record_failure(SourceKind::Subgraph, "indexing errors reported");
            } else {
                monitor.record_success(SourceKind::Subgraph);
            }
        }
        Err(e) => monitor.record_failure(SourceKind::Subgraph, &e.to_string()),
    }

    print_summary(&monitor.health_summary());
    Ok(())
}
