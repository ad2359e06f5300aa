//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 when consumers are running)
//! - `/metrics` - Prometheus metrics endpoint

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels for per-message-type counters
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MessageLabels {
    pub message_type: String,
}

impl EncodeLabelSet for MessageLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("message_type", self.message_type.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for consume outcomes
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct OutcomeLabels {
    pub outcome: String,
}

impl EncodeLabelSet for OutcomeLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("outcome", self.outcome.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the agent
pub struct Metrics {
    /// Messages published, by discriminator
    pub messages_published_total: Family<MessageLabels, Counter>,
    /// Messages consumed, by settlement outcome (ack/requeue/drop)
    pub messages_consumed_total: Family<OutcomeLabels, Counter>,
    /// Payloads that failed envelope decoding
    pub decode_failures_total: Counter,
    /// Watch events forwarded to the reconciliation loop
    pub watch_events_total: Counter,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let messages_published_total = Family::<MessageLabels, Counter>::default();
        registry.register(
            "edgebus_messages_published",
            "Total number of messages published to the broker",
            messages_published_total.clone(),
        );

        let messages_consumed_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "edgebus_messages_consumed",
            "Total number of consumed messages by settlement outcome",
            messages_consumed_total.clone(),
        );

        let decode_failures_total = Counter::default();
        registry.register(
            "edgebus_decode_failures",
            "Total number of payloads that failed envelope decoding",
            decode_failures_total.clone(),
        );

        let watch_events_total = Counter::default();
        registry.register(
            "edgebus_watch_events",
            "Total number of resource watch events forwarded",
            watch_events_total.clone(),
        );

        Self {
            messages_published_total,
            messages_consumed_total,
            decode_failures_total,
            watch_events_total,
            registry,
        }
    }

    /// Record a published message
    pub fn record_published(&self, message_type: &str) {
        self.messages_published_total
            .get_or_create(&MessageLabels {
                message_type: message_type.to_string(),
            })
            .inc();
    }

    /// Record a consumed message's settlement outcome
    pub fn record_consumed(&self, outcome: &str) {
        self.messages_consumed_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the agent is ready (broker consumer running)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
        }
    }

    /// Mark the agent as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the agent is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on the given address.
pub async fn run_health_server(
    state: Arc<HealthState>,
    addr: SocketAddr,
) -> Result<(), std::io::Error> {
    let app = create_router(state);
    info!(%addr, "starting health server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_starts_not_ready() {
        let state = HealthState::new();
        assert!(!state.is_ready().await);
        state.set_ready(true).await;
        assert!(state.is_ready().await);
    }

    #[test]
    fn test_metrics_encode_contains_counters() {
        let metrics = Metrics::new();
        metrics.record_published("heartbeat");
        metrics.record_consumed("ack");
        metrics.decode_failures_total.inc();
        let body = metrics.encode();
        assert!(body.contains("edgebus_messages_published"));
        assert!(body.contains("message_type=\"heartbeat\""));
        assert!(body.contains("outcome=\"ack\""));
        assert!(body.contains("edgebus_decode_failures"));
    }
}
