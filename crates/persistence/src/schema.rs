//! Database schema definitions
//!
//! NOTE: All sizes/prices/USDC amounts stored as TEXT to preserve
//! rust_decimal::Decimal precision. Ratios (z-scores, probabilities) are REAL.
//! Timestamps are unix seconds (INTEGER, UTC).

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Prediction markets (canonical records and token_-prefixed stubs)
CREATE TABLE IF NOT EXISTS markets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    condition_id TEXT NOT NULL UNIQUE,
    question TEXT NOT NULL DEFAULT '',
    outcomes TEXT NOT NULL DEFAULT '["Yes","No"]',
    outcome_prices TEXT,
    end_date INTEGER,
    resolution_date INTEGER,
    resolved_outcome TEXT,
    volume TEXT NOT NULL DEFAULT '0',
    volume_24h TEXT NOT NULL DEFAULT '0',
    liquidity TEXT NOT NULL DEFAULT '0',
    category TEXT NOT NULL DEFAULT 'other',
    is_event_based INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    meta TEXT NOT NULL DEFAULT '{}',
    last_synced_at INTEGER,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Wallets (one row per address that has traded)
CREATE TABLE IF NOT EXISTS wallets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE,
    total_trades INTEGER NOT NULL DEFAULT 0,
    total_volume TEXT NOT NULL DEFAULT '0',
    unique_markets INTEGER NOT NULL DEFAULT 0,
    resolved_positions INTEGER NOT NULL DEFAULT 0,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    win_rate REAL,
    first_seen_at INTEGER,
    last_seen_at INTEGER,
    last_aggregated_at INTEGER
);

-- Trades (append-only except derived-metric updates)
CREATE TABLE IF NOT EXISTS trades (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    transaction_hash TEXT NOT NULL UNIQUE,
    market_id INTEGER NOT NULL REFERENCES markets(id),
    wallet_id INTEGER NOT NULL REFERENCES wallets(id),
    wallet_address TEXT NOT NULL,
    condition_id TEXT NOT NULL,
    side TEXT NOT NULL,
    outcome TEXT NOT NULL,
    outcome_index INTEGER NOT NULL DEFAULT 0,
    size TEXT NOT NULL,
    price TEXT NOT NULL,
    usdc_size TEXT NOT NULL,
    trade_timestamp INTEGER NOT NULL,
    hours_before_resolution REAL,
    wallet_age_days REAL,
    wallet_trade_count INTEGER,
    price_extremity REAL,
    was_correct INTEGER,
    profit_loss TEXT,
    meta TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Statistical baselines, one row per (category, metric).
-- Insider distribution columns are populated on the 'all' rows only.
CREATE TABLE IF NOT EXISTS baselines (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    metric TEXT NOT NULL,
    mean REAL NOT NULL,
    std_dev REAL NOT NULL,
    median REAL NOT NULL,
    p75 REAL NOT NULL,
    p90 REAL NOT NULL,
    p95 REAL NOT NULL,
    p99 REAL NOT NULL,
    sample_count INTEGER NOT NULL,
    insider_mean REAL,
    insider_std_dev REAL,
    insider_sample_count INTEGER NOT NULL DEFAULT 0,
    separation_score REAL,
    calculated_at INTEGER NOT NULL,
    UNIQUE(category, metric)
);

-- Per-trade anomaly scores. A NULL z-score means the input or baseline was
-- missing - it is never coerced to 0.
CREATE TABLE IF NOT EXISTS trade_scores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id INTEGER NOT NULL UNIQUE REFERENCES trades(id),
    size_zscore REAL,
    timing_zscore REAL,
    wallet_age_zscore REAL,
    wallet_activity_zscore REAL,
    price_extremity_zscore REAL,
    position_concentration_zscore REAL,
    funding_proximity_zscore REAL,
    anomaly_score REAL NOT NULL,
    insider_probability REAL NOT NULL,
    trinity_pattern INTEGER NOT NULL DEFAULT 0,
    matched_patterns TEXT NOT NULL DEFAULT '{}',
    score_breakdown TEXT NOT NULL DEFAULT '{}',
    scored_at INTEGER NOT NULL
);

-- Declarative detection rules with running validation stats
CREATE TABLE IF NOT EXISTS patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern_name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    conditions TEXT NOT NULL,
    alert_threshold REAL NOT NULL DEFAULT 0.7,
    true_positives INTEGER NOT NULL DEFAULT 0,
    false_positives INTEGER NOT NULL DEFAULT 0,
    precision REAL,
    recall REAL,
    f1_score REAL,
    lift REAL,
    is_active INTEGER NOT NULL DEFAULT 1,
    validated_at INTEGER,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Labeled truth cases fed back into the insider baselines
CREATE TABLE IF NOT EXISTS confirmed_insiders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_address TEXT NOT NULL,
    condition_id TEXT,
    trade_id INTEGER REFERENCES trades(id),
    confidence_level TEXT NOT NULL DEFAULT 'suspected',
    confirmation_source TEXT,
    evidence TEXT NOT NULL DEFAULT '[]',
    used_for_training INTEGER NOT NULL DEFAULT 0,
    training_weight REAL NOT NULL DEFAULT 1.0,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Suspicious trades promoted for human review
CREATE TABLE IF NOT EXISTS investigation_candidates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    trade_id INTEGER NOT NULL UNIQUE REFERENCES trades(id),
    score_id INTEGER REFERENCES trade_scores(id),
    market_id INTEGER REFERENCES markets(id),
    batch_id TEXT,
    discovery_rank INTEGER,
    anomaly_score REAL NOT NULL,
    insider_probability REAL NOT NULL,
    wallet_address TEXT NOT NULL,
    condition_id TEXT NOT NULL,
    question TEXT NOT NULL DEFAULT '',
    side TEXT NOT NULL,
    outcome TEXT NOT NULL,
    size TEXT NOT NULL,
    price TEXT NOT NULL,
    usdc_size TEXT NOT NULL,
    profit_loss TEXT,
    hours_before_resolution REAL,
    anomaly_breakdown TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'undiscovered',
    priority TEXT NOT NULL DEFAULT 'low',
    resolution TEXT,
    notes TEXT NOT NULL DEFAULT '[]',
    evidence TEXT NOT NULL DEFAULT '[]',
    discovered_at INTEGER NOT NULL,
    resolved_at INTEGER
);

-- One row per discovery run
CREATE TABLE IF NOT EXISTS discovery_batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id TEXT NOT NULL UNIQUE,
    min_anomaly_score REAL NOT NULL,
    min_insider_probability REAL NOT NULL,
    min_profit TEXT,
    limit_requested INTEGER NOT NULL,
    trades_examined INTEGER NOT NULL DEFAULT 0,
    candidates_created INTEGER NOT NULL DEFAULT 0,
    top_score REAL,
    median_score REAL,
    started_at INTEGER NOT NULL,
    completed_at INTEGER,
    notes TEXT
);

-- Real-time alerts emitted by the trade monitor
CREATE TABLE IF NOT EXISTS alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id TEXT NOT NULL UNIQUE,
    alert_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',
    trade_id INTEGER REFERENCES trades(id),
    wallet_address TEXT,
    condition_id TEXT,
    question TEXT,
    anomaly_score REAL,
    insider_probability REAL,
    matched_patterns TEXT NOT NULL DEFAULT '{}',
    context TEXT NOT NULL DEFAULT '{}',
    triggered_at INTEGER NOT NULL,
    acknowledged_at INTEGER,
    resolved_at INTEGER
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_markets_category ON markets(category);
CREATE INDEX IF NOT EXISTS idx_markets_resolved ON markets(resolved_outcome);

CREATE INDEX IF NOT EXISTS idx_trades_market ON trades(market_id);
CREATE INDEX IF NOT EXISTS idx_trades_wallet ON trades(wallet_address);
CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(trade_timestamp DESC);

CREATE INDEX IF NOT EXISTS idx_scores_anomaly ON trade_scores(anomaly_score DESC);
CREATE INDEX IF NOT EXISTS idx_scores_probability ON trade_scores(insider_probability DESC);

CREATE INDEX IF NOT EXISTS idx_insiders_wallet ON confirmed_insiders(wallet_address);
CREATE INDEX IF NOT EXISTS idx_candidates_status ON investigation_candidates(status);
CREATE INDEX IF NOT EXISTS idx_candidates_batch ON investigation_candidates(batch_id);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);
CREATE INDEX IF NOT EXISTS idx_alerts_triggered ON alerts(triggered_at DESC)
"#;

/// ALTER TABLE migrations for columns added after the initial schema.
/// "duplicate column name" errors are tolerated on re-run.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE investigation_candidates ADD COLUMN assigned_to TEXT",
    "ALTER TABLE trade_scores ADD COLUMN score_mode TEXT",
];
