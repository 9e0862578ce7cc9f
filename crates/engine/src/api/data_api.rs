//! Centralized data API client — public endpoints, no authentication required
//!
//! Two base hosts: the data host for trades/activity/positions and the gamma
//! host for market metadata. Requests optionally route through an egress
//! proxy, in which case the timeout is doubled.

use super::{FetchError, FetchResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_DATA_URL: &str = "https://data-api.polymarket.com";
const DEFAULT_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const PROXIED_TIMEOUT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Deserialization structs — external field names read verbatim
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTrade {
    pub proxy_wallet: Option<String>,
    pub side: Option<String>,
    pub condition_id: Option<String>,
    pub size: Option<f64>,
    pub price: Option<f64>,
    pub usdc_size: Option<f64>,
    /// Unix seconds
    pub timestamp: Option<i64>,
    pub title: Option<String>,
    pub event_slug: Option<String>,
    pub outcome: Option<String>,
    pub outcome_index: Option<i64>,
    pub transaction_hash: Option<String>,
}

/// Market metadata from the gamma host. `outcomes`, `outcome_prices` and
/// `clob_token_ids` arrive as either a JSON-encoded string or a native list,
/// so they are kept as raw values and normalized by the ingestor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMarket {
    pub condition_id: Option<String>,
    pub question: Option<String>,
    pub outcomes: Option<serde_json::Value>,
    pub outcome_prices: Option<serde_json::Value>,
    pub end_date: Option<String>,
    pub resolved_outcome: Option<String>,
    pub volume: Option<serde_json::Value>,
    pub volume_24hr: Option<f64>,
    pub liquidity: Option<serde_json::Value>,
    pub category: Option<String>,
    pub closed: Option<bool>,
    pub active: Option<bool>,
    pub clob_token_ids: Option<serde_json::Value>,
    pub events: Option<Vec<serde_json::Value>>,
}

/// Filters for GET /trades
#[derive(Debug, Clone, Default)]
pub struct TradeQuery {
    pub market: Option<String>,
    pub user: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

// ---------------------------------------------------------------------------
// Client implementation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DataApiClient {
    client: Client,
    data_url: String,
    gamma_url: String,
}

impl Default for DataApiClient {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DataApiClient {
    /// Build a client; `proxy_url` routes all requests through an egress
    /// proxy with a doubled timeout.
    pub fn new(proxy_url: Option<&str>) -> Self {
        let timeout = if proxy_url.is_some() {
            PROXIED_TIMEOUT_SECS
        } else {
            DEFAULT_TIMEOUT_SECS
        };

        let mut builder = Client::builder().timeout(std::time::Duration::from_secs(timeout));
        if let Some(url) = proxy_url {
            if let Ok(proxy) = reqwest::Proxy::all(url) {
                builder = builder.proxy(proxy);
            }
        }

        Self {
            client: builder.build().expect("Failed to build HTTP client"),
            data_url: DEFAULT_DATA_URL.to_string(),
            gamma_url: DEFAULT_GAMMA_URL.to_string(),
        }
    }

    /// Override both base URLs (tests and self-hosted mirrors)
    pub fn with_base_urls(mut self, data_url: &str, gamma_url: &str) -> Self {
        self.data_url = data_url.trim_end_matches('/').to_string();
        self.gamma_url = gamma_url.trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> FetchResult<T> {
        debug!(url, "GET");
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::from_status(resp.status()));
        }
        Ok(resp.json::<T>().await?)
    }

    /// GET /trades — recent fills, paginated
    pub async fn get_trades(&self, query: &TradeQuery) -> FetchResult<Vec<ApiTrade>> {
        let mut url = format!(
            "{}/trades?limit={}&offset={}&takerOnly=false",
            self.data_url, query.limit, query.offset
        );
        if let Some(market) = &query.market {
            url.push_str(&format!("&market={market}"));
        }
        if let Some(user) = &query.user {
            url.push_str(&format!("&user={user}"));
        }

        let trades: Vec<ApiTrade> = self.get_json(&url).await?;
        debug!(count = trades.len(), "Trades fetched");
        Ok(trades)
    }

    /// GET /activity?user=… — opaque activity records
    pub async fn get_activity(&self, user: &str, limit: u32) -> FetchResult<Vec<serde_json::Value>> {
        let url = format!("{}/activity?user={}&limit={}", self.data_url, user, limit);
        self.get_json(&url).await
    }

    /// GET /positions?user=… — opaque position records
    pub async fn get_positions(&self, user: &str) -> FetchResult<Vec<serde_json::Value>> {
        let url = format!("{}/positions?user={}", self.data_url, user);
        self.get_json(&url).await
    }

    /// GET /markets — market metadata page from the gamma host
    pub async fn get_markets(
        &self,
        offset: u32,
        limit: u32,
        active_only: bool,
    ) -> FetchResult<Vec<ApiMarket>> {
        let mut url = format!(
            "{}/markets?limit={}&offset={}&order=volume24hr&ascending=false",
            self.gamma_url, limit, offset
        );
        if active_only {
            url.push_str("&active=true&closed=false");
        }

        let markets: Vec<ApiMarket> = self.get_json(&url).await?;
        debug!(count = markets.len(), "Markets fetched");
        Ok(markets)
    }

    /// GET /markets/{condition_id} — one market by its condition id
    pub async fn get_market(&self, condition_id: &str) -> FetchResult<ApiMarket> {
        let url = format!("{}/markets/{}", self.gamma_url, condition_id);
        self.get_json(&url).await
    }

    /// GET /events — opaque event records
    pub async fn get_events(&self, offset: u32, limit: u32) -> FetchResult<Vec<serde_json::Value>> {
        let url = format!("{}/events?limit={}&offset={}", self.gamma_url, limit, offset);
        self.get_json(&url).await
    }

    /// Light request used by the health probe loop
    pub async fn probe(&self) -> FetchResult<()> {
        let query = TradeQuery {
            limit: 1,
            ..Default::default()
        };
        self.get_trades(&query).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_fields_read_verbatim() {
        let raw = r#"{
            "proxyWallet": "0xAbC",
            "side": "BUY",
            "conditionId": "0xcond",
            "size": 300.0,
            "price": 0.5,
            "usdcSize": 150.0,
            "timestamp": 1700000000,
            "outcome": "Yes",
            "outcomeIndex": 0,
            "transactionHash": "0xdeadbeef"
        }"#;
        let trade: ApiTrade = serde_json::from_str(raw).unwrap();
        assert_eq!(trade.proxy_wallet.as_deref(), Some("0xAbC"));
        assert_eq!(trade.usdc_size, Some(150.0));
        assert_eq!(trade.outcome_index, Some(0));
        assert_eq!(trade.transaction_hash.as_deref(), Some("0xdeadbeef"));
    }

    #[test]
    fn test_market_tolerates_stringified_lists() {
        let raw = r#"{
            "conditionId": "0xcond",
            "question": "Will it resolve?",
            "outcomes": "[\"Yes\", \"No\"]",
            "outcomePrices": ["0.97", "0.03"],
            "volume24hr": 1234.5,
            "closed": false,
            "active": true,
            "clobTokenIds": "[\"123\", \"456\"]"
        }"#;
        let market: ApiMarket = serde_json::from_str(raw).unwrap();
        assert!(market.outcomes.as_ref().unwrap().is_string());
        assert!(market.outcome_prices.as_ref().unwrap().is_array());
    }
}
