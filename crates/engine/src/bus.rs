//! In-process pub/sub channels
//!
//! Two topics: `data_source:failover` and `polymarket:alerts`. Broadcast
//! semantics — every subscriber gets every event; lagging receivers drop
//! the oldest events.

use persistence::repository::AlertRecord;
use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Channel name for failover events
pub const FAILOVER_CHANNEL: &str = "data_source:failover";
/// Channel name for alert events
pub const ALERTS_CHANNEL: &str = "polymarket:alerts";

/// Payload on `data_source:failover`
#[derive(Debug, Clone, Serialize)]
pub struct FailoverEvent {
    pub from: String,
    pub to: String,
    pub reason: String,
    pub timestamp: i64,
}

/// Payload on `polymarket:alerts`
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub alert: AlertRecord,
}

#[derive(Clone)]
pub struct EventBus {
    failover: broadcast::Sender<FailoverEvent>,
    alerts: broadcast::Sender<AlertEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (failover, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (alerts, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { failover, alerts }
    }

    /// Publish a failover event. Returns the number of receivers reached.
    pub fn publish_failover(&self, event: FailoverEvent) -> usize {
        tracing::info!(
            channel = FAILOVER_CHANNEL,
            from = %event.from,
            to = %event.to,
            reason = %event.reason,
            "Data source failover"
        );
        self.failover.send(event).unwrap_or(0)
    }

    /// Publish an alert event. Returns the number of receivers reached.
    pub fn publish_alert(&self, event: AlertEvent) -> usize {
        tracing::debug!(
            channel = ALERTS_CHANNEL,
            alert_id = %event.alert.alert_id,
            "Alert published"
        );
        self.alerts.send(event).unwrap_or(0)
    }

    pub fn subscribe_failover(&self) -> broadcast::Receiver<FailoverEvent> {
        self.failover.subscribe()
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failover_roundtrip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_failover();

        bus.publish_failover(FailoverEvent {
            from: "api".into(),
            to: "subgraph".into(),
            reason: "rate limited".into(),
            timestamp: 1_700_000_000,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.from, "api");
        assert_eq!(event.to, "subgraph");
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        let reached = bus.publish_failover(FailoverEvent {
            from: "api".into(),
            to: "subgraph".into(),
            reason: "probe".into(),
            timestamp: 0,
        });
        assert_eq!(reached, 0);
    }
}
