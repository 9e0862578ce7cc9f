//! Wallets repository — addresses and their eventually-consistent aggregates

use crate::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WalletRecord {
    pub id: Option<i64>,
    pub address: String,
    pub total_trades: i64,
    pub total_volume: String,
    pub unique_markets: i64,
    pub resolved_positions: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate: Option<f64>,
    pub first_seen_at: Option<i64>,
    pub last_seen_at: Option<i64>,
    pub last_aggregated_at: Option<i64>,
}

pub struct WalletRepository<'a> {
    pool: &'a SqlitePool,
}

const WALLET_COLUMNS: &str = "id, address, total_trades, total_volume, unique_markets, \
     resolved_positions, wins, losses, win_rate, first_seen_at, last_seen_at, last_aggregated_at";

impl<'a> WalletRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensure a wallet row exists for the address, widening its seen window.
    /// Race-safe: a concurrent insert is absorbed by the conflict clause.
    pub async fn ensure(&self, address: &str, seen_at: i64) -> DbResult<WalletRecord> {
        sqlx::query(
            r#"
            INSERT INTO wallets (address, first_seen_at, last_seen_at)
            VALUES (?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                first_seen_at = MIN(COALESCE(wallets.first_seen_at, excluded.first_seen_at), excluded.first_seen_at),
                last_seen_at = MAX(COALESCE(wallets.last_seen_at, excluded.last_seen_at), excluded.last_seen_at)
            "#,
        )
        .bind(address)
        .bind(seen_at)
        .bind(seen_at)
        .execute(self.pool)
        .await?;

        self.get_by_address(address)
            .await?
            .ok_or_else(|| DbError::Query(format!("wallet {address} vanished after insert")))
    }

    pub async fn get_by_address(&self, address: &str) -> DbResult<Option<WalletRecord>> {
        let record = sqlx::query_as::<_, WalletRecord>(&format!(
            "SELECT {WALLET_COLUMNS} FROM wallets WHERE address = ?"
        ))
        .bind(address)
        .fetch_optional(self.pool)
        .await?;
        Ok(record)
    }

    /// Recompute one wallet's aggregates from its trades.
    ///
    /// wins + losses <= resolved_positions <= total_trades holds by
    /// construction: resolved counts trades with a was_correct verdict.
    pub async fn refresh_aggregates(&self, address: &str, now: i64) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE wallets SET
                total_trades = (SELECT COUNT(*) FROM trades WHERE wallet_address = ?1),
                total_volume = (SELECT CAST(COALESCE(SUM(CAST(usdc_size AS REAL)), 0) AS TEXT)
                                FROM trades WHERE wallet_address = ?1),
                unique_markets = (SELECT COUNT(DISTINCT market_id) FROM trades WHERE wallet_address = ?1),
                resolved_positions = (SELECT COUNT(*) FROM trades
                                      WHERE wallet_address = ?1 AND was_correct IS NOT NULL),
                wins = (SELECT COUNT(*) FROM trades WHERE wallet_address = ?1 AND was_correct = 1),
                losses = (SELECT COUNT(*) FROM trades WHERE wallet_address = ?1 AND was_correct = 0),
                win_rate = (SELECT CASE WHEN COUNT(*) > 0
                                THEN CAST(SUM(was_correct) AS REAL) / COUNT(*)
                                ELSE NULL END
                            FROM trades WHERE wallet_address = ?1 AND was_correct IS NOT NULL),
                first_seen_at = COALESCE((SELECT MIN(trade_timestamp) FROM trades WHERE wallet_address = ?1),
                                         first_seen_at),
                last_seen_at = COALESCE((SELECT MAX(trade_timestamp) FROM trades WHERE wallet_address = ?1),
                                        last_seen_at),
                last_aggregated_at = ?2
            WHERE address = ?1
            "#,
        )
        .bind(address)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Refresh aggregates for every wallet. Returns the number refreshed.
    pub async fn refresh_all_aggregates(&self, now: i64) -> DbResult<u64> {
        let addresses: Vec<(String,)> = sqlx::query_as("SELECT address FROM wallets")
            .fetch_all(self.pool)
            .await?;

        let mut refreshed = 0u64;
        for (address,) in &addresses {
            self.refresh_aggregates(address, now).await?;
            refreshed += 1;
        }
        Ok(refreshed)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM wallets")
            .fetch_one(self.pool)
            .await?;
        Ok(n)
    }
}
