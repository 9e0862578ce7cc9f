//! Trade collector — health-aware reads with API -> subgraph failover
//!
//! The centralized API is the primary for trade reads (richer records); when
//! it fails and failover is enabled, the same window is re-fetched from the
//! subgraph and a `data_source:failover` event is broadcast.

use crate::api::subgraph::OrderFilledFilter;
use crate::api::{ApiTrade, DataApiClient, FetchResult, OrderFilledEvent, SubgraphClient};
use crate::health::{HealthMonitor, SourceKind};
use std::sync::Arc;
use tracing::{info, warn};

/// Trades fetched from whichever source answered
#[derive(Debug)]
pub enum TradeBatch {
    Api(Vec<ApiTrade>),
    Subgraph(Vec<OrderFilledEvent>),
}

impl TradeBatch {
    pub fn source(&self) -> SourceKind {
        match self {
            Self::Api(_) => SourceKind::Api,
            Self::Subgraph(_) => SourceKind::Subgraph,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Api(trades) => trades.len(),
            Self::Subgraph(events) => events.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct TradeCollector {
    api: DataApiClient,
    subgraph: SubgraphClient,
    health: Arc<HealthMonitor>,
}

impl TradeCollector {
    pub fn new(api: DataApiClient, subgraph: SubgraphClient, health: Arc<HealthMonitor>) -> Self {
        Self {
            api,
            subgraph,
            health,
        }
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Fetch recent trades from the API, failing over to the subgraph when
    /// asked to. Every call outcome is recorded with the health monitor.
    pub async fn fetch_recent(
        &self,
        limit: u32,
        from_ts: Option<i64>,
        failover: bool,
    ) -> FetchResult<TradeBatch> {
        let query = crate::api::data_api::TradeQuery {
            limit,
            ..Default::default()
        };

        match self.api.get_trades(&query).await {
            Ok(trades) => {
                self.health.record_success(SourceKind::Api);
                Ok(TradeBatch::Api(trades))
            }
            Err(api_err) => {
                self.health.record_failure(SourceKind::Api, &api_err.to_string());
                if !failover {
                    return Err(api_err);
                }

                warn!(error = %api_err, "API trade fetch failed, failing over to subgraph");
                let filter = OrderFilledFilter {
                    from_ts,
                    ..Default::default()
                };
                match self
                    .subgraph
                    .order_filled_events(&filter, "timestamp", "desc", limit, 0)
                    .await
                {
                    Ok(events) => {
                        self.health.record_success(SourceKind::Subgraph);
                        self.health.publish_failover(
                            SourceKind::Api,
                            SourceKind::Subgraph,
                            &api_err.to_string(),
                        );
                        info!(count = events.len(), "Failover fetch from subgraph succeeded");
                        Ok(TradeBatch::Subgraph(events))
                    }
                    Err(sub_err) => {
                        self.health
                            .record_failure(SourceKind::Subgraph, &sub_err.to_string());
                        Err(sub_err)
                    }
                }
            }
        }
    }

    /// Fetch a window of order-filled events directly from the subgraph
    pub async fn fetch_subgraph_window(
        &self,
        filter: &OrderFilledFilter,
        limit: u32,
        skip: u32,
    ) -> FetchResult<Vec<OrderFilledEvent>> {
        match self
            .subgraph
            .order_filled_events(filter, "timestamp", "asc", limit, skip)
            .await
        {
            Ok(events) => {
                self.health.record_success(SourceKind::Subgraph);
                Ok(events)
            }
            Err(e) => {
                self.health
                    .record_failure(SourceKind::Subgraph, &e.to_string());
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;

    /// Clients pointed at a closed local port fail with a transport error
    fn dead_collector() -> (TradeCollector, EventBus) {
        let bus = EventBus::new();
        let api = DataApiClient::new(None)
            .with_base_urls("http://127.0.0.1:9", "http://127.0.0.1:9");
        let subgraph = SubgraphClient::new(Some("http://127.0.0.1:9"));
        let health = Arc::new(HealthMonitor::new(bus.clone()));
        (TradeCollector::new(api, subgraph, health), bus)
    }

    #[tokio::test]
    async fn test_repeated_api_failures_mark_source_unhealthy() {
        let (collector, _bus) = dead_collector();

        for _ in 0..3 {
            let result = collector.fetch_recent(10, None, false).await;
            assert!(result.is_err());
        }

        // 3 failures of the last 10 outcomes: below the 0.8 floor
        assert!(!collector.health().is_healthy(SourceKind::Api));
        assert_eq!(collector.health().recommended_source(), SourceKind::Subgraph);
    }

    #[tokio::test]
    async fn test_failover_failure_records_both_sources() {
        let (collector, bus) = dead_collector();
        let mut rx = bus.subscribe_failover();

        let result = collector.fetch_recent(10, None, true).await;
        assert!(result.is_err());

        // Both sources saw the failure; no failover event was published
        // because the subgraph leg failed too
        let summary = collector.health().health_summary();
        assert!(summary.api.last_failure.is_some());
        assert!(summary.subgraph.last_failure.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_failover_without_flag() {
        let (collector, _bus) = dead_collector();

        let result = collector.fetch_recent(10, None, false).await;
        assert!(result.is_err());

        // Subgraph was never consulted
        let summary = collector.health().health_summary();
        assert!(summary.subgraph.last_failure.is_none());
        assert_eq!(summary.subgraph.window_size, 0);
    }
}
