//! Per-client call counters.

use platform_common::{Counter, Gauge};
use serde::Serialize;

/// Counters for one named client.
#[derive(Debug)]
pub struct ClientMetrics {
    /// Calls started
    pub requests_total: Counter,
    /// Calls that surfaced an error
    pub failures_total: Counter,
    /// Extra attempts made after a retryable failure
    pub retries_total: Counter,
    /// Calls rejected by an open circuit
    pub circuit_rejections_total: Counter,
    /// Calls currently in flight
    pub in_flight: Gauge,
}

/// Serializable view of [`ClientMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Calls started
    pub requests_total: u64,
    /// Calls that surfaced an error
    pub failures_total: u64,
    /// Extra attempts
    pub retries_total: u64,
    /// Open-circuit rejections
    pub circuit_rejections_total: u64,
    /// In flight now
    pub in_flight: i64,
}

impl ClientMetrics {
    /// Counters labelled with the client name.
    #[must_use]
    pub fn new(client: &str) -> Self {
        Self {
            requests_total: Counter::new("fabric_client_requests_total", "Outbound calls started")
                .with_label("client", client),
            failures_total: Counter::new("fabric_client_failures_total", "Outbound calls that failed")
                .with_label("client", client),
            retries_total: Counter::new("fabric_client_retries_total", "Retry attempts")
                .with_label("client", client),
            circuit_rejections_total: Counter::new(
                "fabric_client_circuit_rejections_total",
                "Calls rejected by an open circuit",
            )
            .with_label("client", client),
            in_flight: Gauge::new("fabric_client_in_flight", "Outbound calls in flight")
                .with_label("client", client),
        }
    }

    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.get(),
            failures_total: self.failures_total.get(),
            retries_total: self.retries_total.get(),
            circuit_rejections_total: self.circuit_rejections_total.get(),
            in_flight: self.in_flight.get(),
        }
    }

    /// Prometheus text for every metric.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        [
            self.requests_total.to_prometheus(),
            self.failures_total.to_prometheus(),
            self.retries_total.to_prometheus(),
            self.circuit_rejections_total.to_prometheus(),
            self.in_flight.to_prometheus(),
        ]
        .concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_and_snapshot() {
        let metrics = ClientMetrics::new("jobs");
        metrics.requests_total.inc();
        metrics.retries_total.inc_by(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_total, 1);
        assert_eq!(snapshot.retries_total, 2);
        assert_eq!(snapshot.failures_total, 0);

        let text = metrics.to_prometheus();
        assert!(text.contains("fabric_client_requests_total{client=\"jobs\"} 1"));
        assert!(text.contains("# TYPE fabric_client_in_flight gauge"));
    }
}
