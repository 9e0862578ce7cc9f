//! Repository modules, one per aggregate

pub mod alerts;
pub mod baselines;
pub mod candidates;
pub mod insiders;
pub mod markets;
pub mod patterns;
pub mod scores;
pub mod trades;
pub mod wallets;

pub use alerts::{AlertRecord, AlertRepository};
pub use baselines::{BaselineRecord, BaselineRepository, NormalStats};
pub use candidates::{
    BatchRepository, CandidateRecord, CandidateRepository, DiscoveryBatchRecord,
};
pub use insiders::{ConfirmedInsiderRecord, InsiderRepository};
pub use markets::{MarketRecord, MarketRepository, STUB_CONDITION_PREFIX};
pub use patterns::{PatternRecord, PatternRepository, PatternValidation};
pub use scores::{ScoreRepository, ScoredTradeRow, TradeScoreRecord, ValidationRow};
pub use trades::{TradeRecord, TradeRepository, TradeUpsert};
pub use wallets::{WalletRecord, WalletRepository};
