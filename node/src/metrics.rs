//! # Prometheus Metrics
//!
//! Exposes operational gauges for the node at `/metrics` on the configured
//! metrics port. A sampler task copies the current values out of the
//! ledger, the pool and the peer map on a fixed interval, so nothing on the
//! hot path touches Prometheus.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;

use keel_protocol::network::NodeHandle;

/// How often the sampler refreshes the gauges.
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(2);

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Height of the local tip.
    pub block_height: IntGauge,
    /// Transactions waiting in the pool.
    pub pending_transactions: IntGauge,
    /// Currently connected peers.
    pub connected_peers: IntGauge,
    /// Committed transactions in the ledger.
    pub committed_transactions: IntGauge,
}

fn register_gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric creation");
    registry
        .register(Box::new(gauge.clone()))
        .expect("metric registration");
    gauge
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("keel".into()), None)
            .expect("failed to create prometheus registry");

        Self {
            block_height: register_gauge(&registry, "block_height", "Height of the local tip"),
            pending_transactions: register_gauge(
                &registry,
                "pending_transactions",
                "Transactions waiting in the pool",
            ),
            connected_peers: register_gauge(
                &registry,
                "connected_peers",
                "Number of currently connected peers",
            ),
            committed_transactions: register_gauge(
                &registry,
                "committed_transactions",
                "Transactions committed to the ledger",
            ),
            registry,
        }
    }

    /// Copy current values out of a running node.
    pub fn sample(&self, node: &NodeHandle) {
        match node.ledger().height() {
            Ok(h) => self.block_height.set(i64::from(h)),
            Err(e) => tracing::warn!(error = %e, "failed to sample block height"),
        }
        match node.ledger().tx_count() {
            Ok(n) => self.committed_transactions.set(n as i64),
            Err(e) => tracing::warn!(error = %e, "failed to sample transaction count"),
        }
        self.pending_transactions
            .set(node.pool().pending_count() as i64);
        self.connected_peers.set(node.peer_count() as i64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Refresh `metrics` from `node` every [`SAMPLE_INTERVAL`] until aborted.
pub fn spawn_sampler(metrics: SharedMetrics, node: NodeHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SAMPLE_INTERVAL);
        loop {
            interval.tick().await;
            metrics.sample(&node);
        }
    })
}

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_contains_prefixed_gauges() {
        let metrics = NodeMetrics::new();
        metrics.block_height.set(42);
        metrics.connected_peers.set(3);

        let text = metrics.encode().unwrap();
        assert!(text.contains("keel_block_height 42"));
        assert!(text.contains("keel_connected_peers 3"));
        assert!(text.contains("keel_pending_transactions 0"));
        assert!(text.contains("keel_committed_transactions 0"));
    }
}
