//! Bridge traffic counters
//!
//! Six monotonically increasing counters kept in a private prometheus
//! registry. They are informational only; nothing reads them to make
//! decisions.

use crate::schemas::ContentKind;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};

/// Counter handles shared by the HTTP layer and the bridge engine
#[derive(Clone)]
pub struct BridgeMetrics {
    registry: Registry,
    received: IntCounter,
    sent: IntCounter,
    replied: IntCounter,
    returned: IntCounter,
    errored: IntCounter,
    processed: IntCounter,
}

impl BridgeMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            received: counter("bridge_received_total", "Bridge requests accepted")?,
            sent: counter("bridge_sent_total", "Messages sent to the broker")?,
            replied: counter("bridge_replied_total", "Replies delivered by the broker")?,
            returned: counter("bridge_returned_total", "Successful bridge results returned")?,
            errored: counter("bridge_errored_total", "Requests that ended in an error status")?,
            processed: counter("bridge_processed_total", "Requests fully processed")?,
            registry,
        })
    }

    pub fn inc_received(&self) {
        self.received.inc();
    }

    pub fn inc_sent(&self) {
        self.sent.inc();
    }

    pub fn inc_replied(&self) {
        self.replied.inc();
    }

    pub fn inc_returned(&self) {
        self.returned.inc();
    }

    pub fn inc_errored(&self) {
        self.errored.inc();
    }

    pub fn inc_processed(&self) {
        self.processed.inc();
    }

    /// Read every counter. Each value is read on its own, so a snapshot taken
    /// under load is not a single consistent cut.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.get(),
            sent: self.sent.get(),
            replied: self.replied.get(),
            returned: self.returned.get(),
            errored: self.errored.get(),
            processed: self.processed.get(),
        }
    }

    /// Prometheus text exposition of the counters
    pub fn encode_prometheus(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Point-in-time counter values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub sent: u64,
    pub replied: u64,
    pub returned: u64,
    pub errored: u64,
    pub processed: u64,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// `received=N sent=N replied=N returned=N errored=N processed=N`
    pub fn to_plain(&self) -> String {
        format!(
            "received={} sent={} replied={} returned={} errored={} processed={}",
            self.received, self.sent, self.replied, self.returned, self.errored, self.processed
        )
    }

    pub fn render(&self, content_kind: ContentKind) -> String {
        match content_kind {
            ContentKind::Structured => self.to_json(),
            ContentKind::Plain => self.to_plain(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_snapshot() {
        let metrics = BridgeMetrics::new().unwrap();
        metrics.inc_received();
        metrics.inc_received();
        metrics.inc_sent();
        metrics.inc_errored();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.sent, 1);
        assert_eq!(snapshot.errored, 1);
        assert_eq!(snapshot.replied, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = BridgeMetrics::new().unwrap();
        let clone = metrics.clone();
        clone.inc_processed();
        assert_eq!(metrics.snapshot().processed, 1);
    }

    #[test]
    fn test_snapshot_rendering() {
        let snapshot = MetricsSnapshot {
            received: 3,
            sent: 2,
            replied: 1,
            returned: 1,
            errored: 1,
            processed: 2,
        };
        assert_eq!(
            snapshot.to_plain(),
            "received=3 sent=2 replied=1 returned=1 errored=1 processed=2"
        );
        assert_eq!(
            snapshot.to_json(),
            r#"{"received":3,"sent":2,"replied":1,"returned":1,"errored":1,"processed":2}"#
        );
        assert_eq!(snapshot.render(ContentKind::Plain), snapshot.to_plain());
    }

    #[test]
    fn test_prometheus_exposition() {
        let metrics = BridgeMetrics::new().unwrap();
        metrics.inc_replied();
        let text = metrics.encode_prometheus().unwrap();
        assert!(text.contains("bridge_replied_total 1"));
        assert!(text.contains("bridge_received_total 0"));
    }
}
