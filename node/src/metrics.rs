//! # Prometheus Metrics
//!
//! Operational metrics for the bank node, registered in a dedicated
//! registry under the `strongbox` namespace and served at `/metrics` on
//! the metrics port.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use strongbox_contracts::BankInfo;

/// Metric handles for the node. Cloning shares the underlying metrics.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Successful operations by name (`deposit_native`, `withdraw`, ...).
    pub operations_total: IntCounterVec,
    /// Rejected operations by error kind.
    pub rejections_total: IntCounterVec,
    /// Current capacity counter, in accounting units.
    pub capacity_used: IntGauge,
    /// 1 while the bank is halted.
    pub halted: IntGauge,
    /// Time spent inside the engine per request.
    pub operation_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Create and register every metric.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("strongbox".into()), None)?;

        let operations_total = IntCounterVec::new(
            Opts::new("operations_total", "Successful bank operations"),
            &["op"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("rejections_total", "Rejected bank operations by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let capacity_used = IntGauge::new(
            "capacity_used",
            "Total normalized value held, in accounting units",
        )?;
        registry.register(Box::new(capacity_used.clone()))?;

        let halted = IntGauge::new("halted", "1 while deposits and withdrawals are suspended")?;
        registry.register(Box::new(halted.clone()))?;

        let operation_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Engine time per bank operation in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )?;
        registry.register(Box::new(operation_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            operations_total,
            rejections_total,
            capacity_used,
            halted,
            operation_latency_seconds,
        })
    }

    /// Refresh the gauges from a bank summary.
    pub fn observe_bank(&self, info: &BankInfo) {
        self.capacity_used
            .set(i64::try_from(info.total_capacity_used).unwrap_or(i64::MAX));
        self.halted.set(i64::from(info.halted));
    }

    /// Encode every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics handle for handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`.
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
