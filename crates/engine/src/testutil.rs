//! Shared fixtures for the engine's database-backed tests

use persistence::repository::{
    BaselineRepository, ConfirmedInsiderRecord, InsiderRepository, MarketRecord, MarketRepository,
    NormalStats, TradeRecord, TradeRepository, WalletRepository,
};
use persistence::Database;

pub async fn seed_market(
    db: &Database,
    condition_id: &str,
    category: &str,
    resolved: Option<(&str, i64)>,
    is_event_based: bool,
) -> i64 {
    let repo = MarketRepository::new(db.pool());
    let record = MarketRecord {
        id: None,
        condition_id: condition_id.into(),
        question: format!("Test market {condition_id}"),
        outcomes: "[\"Yes\",\"No\"]".into(),
        outcome_prices: None,
        end_date: None,
        resolution_date: resolved.map(|(_, ts)| ts),
        resolved_outcome: resolved.map(|(label, _)| label.to_string()),
        volume: "0".into(),
        volume_24h: "0".into(),
        liquidity: "0".into(),
        category: category.into(),
        is_event_based,
        is_active: true,
        meta: "{}".into(),
        last_synced_at: None,
    };
    repo.upsert(&record).await.unwrap()
}

pub struct SeedTrade<'a> {
    pub tx: &'a str,
    pub market_id: i64,
    pub condition_id: &'a str,
    pub wallet: &'a str,
    pub side: &'a str,
    pub outcome: &'a str,
    pub outcome_index: i64,
    pub size: f64,
    pub price: f64,
    pub ts: i64,
    pub hours_before: Option<f64>,
    pub wallet_age: Option<f64>,
    pub trade_count: Option<i64>,
    pub was_correct: Option<bool>,
    pub profit: Option<f64>,
}

impl Default for SeedTrade<'_> {
    fn default() -> Self {
        Self {
            tx: "0xseed",
            market_id: 0,
            condition_id: "0xcond",
            wallet: "0xwallet",
            side: "BUY",
            outcome: "Yes",
            outcome_index: 0,
            size: 100.0,
            price: 0.5,
            ts: 1_700_000_000,
            hours_before: Some(24.0),
            wallet_age: Some(30.0),
            trade_count: Some(10),
            was_correct: Some(true),
            profit: None,
        }
    }
}

pub async fn seed_trade(db: &Database, seed: SeedTrade<'_>) -> i64 {
    let wallets = WalletRepository::new(db.pool());
    let wallet = wallets.ensure(seed.wallet, seed.ts).await.unwrap();

    let record = TradeRecord {
        id: None,
        transaction_hash: seed.tx.into(),
        market_id: seed.market_id,
        wallet_id: wallet.id.unwrap(),
        wallet_address: seed.wallet.into(),
        condition_id: seed.condition_id.into(),
        side: seed.side.into(),
        outcome: seed.outcome.into(),
        outcome_index: seed.outcome_index,
        size: seed.size.to_string(),
        price: seed.price.to_string(),
        usdc_size: (seed.size * seed.price).to_string(),
        trade_timestamp: seed.ts,
        hours_before_resolution: seed.hours_before,
        wallet_age_days: seed.wallet_age,
        wallet_trade_count: seed.trade_count,
        price_extremity: Some((seed.price - 0.5).abs()),
        was_correct: seed.was_correct,
        profit_loss: seed.profit.map(|p| p.to_string()),
        meta: "{}".into(),
    };

    let trades = TradeRepository::new(db.pool());
    trades.insert(&record).await.unwrap()
}

pub async fn seed_baseline(db: &Database, category: &str, metric: &str, mean: f64, std_dev: f64) {
    let repo = BaselineRepository::new(db.pool());
    let stats = NormalStats {
        mean,
        std_dev,
        median: mean,
        p75: mean + std_dev,
        p90: mean + 2.0 * std_dev,
        p95: mean + 2.5 * std_dev,
        p99: mean + 3.0 * std_dev,
        sample_count: 100,
    };
    repo.upsert_normal(category, metric, &stats, 1_700_000_000)
        .await
        .unwrap();
}

pub async fn seed_insider(db: &Database, wallet: &str, trade_id: Option<i64>) -> i64 {
    let repo = InsiderRepository::new(db.pool());
    repo.insert(&ConfirmedInsiderRecord {
        id: None,
        wallet_address: wallet.into(),
        condition_id: None,
        trade_id,
        confidence_level: "confirmed".into(),
        confirmation_source: Some("test".into()),
        evidence: "[]".into(),
        used_for_training: false,
        training_weight: 1.0,
    })
    .await
    .unwrap()
}
