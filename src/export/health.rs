use anyhow::{Context, Result};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::report::{Report, TopologyKind};

/// Prometheus metrics for aggregator health and observability.
///
/// All metrics use the "toposcope" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total partial reports accepted for merge.
    pub reports_received: Counter,
    /// Total reports rejected before merge (malformed payloads).
    pub reports_rejected: Counter,
    /// Time to fold one partial report into the aggregate.
    pub merge_duration: Histogram,
    /// Nodes in the current aggregate by topology.
    pub topology_nodes: GaugeVec,
    /// Addresses with naming evidence in the current aggregate.
    pub address_records: Gauge,
    /// Connection summary queries served, by topology.
    pub summary_queries: CounterVec,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let reports_received = Counter::with_opts(
            Opts::new(
                "reports_received_total",
                "Total partial reports accepted for merge.",
            )
            .namespace("toposcope"),
        )?;
        let reports_rejected = Counter::with_opts(
            Opts::new(
                "reports_rejected_total",
                "Total reports rejected before merge.",
            )
            .namespace("toposcope"),
        )?;
        let merge_duration = Histogram::with_opts(
            HistogramOpts::new(
                "merge_duration_seconds",
                "Time to fold one partial report into the aggregate.",
            )
            .namespace("toposcope")
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        let topology_nodes = GaugeVec::new(
            Opts::new(
                "topology_nodes",
                "Nodes in the current aggregate by topology.",
            )
            .namespace("toposcope"),
            &["topology"],
        )?;
        let address_records = Gauge::with_opts(
            Opts::new(
                "address_records",
                "Addresses with naming evidence in the current aggregate.",
            )
            .namespace("toposcope"),
        )?;
        let summary_queries = CounterVec::new(
            Opts::new(
                "summary_queries_total",
                "Connection summary queries served by topology.",
            )
            .namespace("toposcope"),
            &["topology"],
        )?;

        registry.register(Box::new(reports_received.clone()))?;
        registry.register(Box::new(reports_rejected.clone()))?;
        registry.register(Box::new(merge_duration.clone()))?;
        registry.register(Box::new(topology_nodes.clone()))?;
        registry.register(Box::new(address_records.clone()))?;
        registry.register(Box::new(summary_queries.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            reports_received,
            reports_rejected,
            merge_duration,
            topology_nodes,
            address_records,
            summary_queries,
        })
    }

    /// Updates the aggregate-size gauges from a report snapshot.
    pub fn observe_aggregate(&self, report: &Report) {
        for kind in TopologyKind::all() {
            self.topology_nodes
                .with_label_values(&[kind.as_str()])
                .set(report.topology(*kind).len() as f64);
        }
        self.address_records.set(report.addresses.len() as f64);
    }

    /// Starts the HTTP server serving /metrics and /healthz.
    pub async fn start(&self) -> Result<()> {
        // Parse address, handling ":port" shorthand.
        let bind_addr = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };

        let registry = self.registry.clone();
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(registry);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health metrics server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health metrics server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(
    axum::extract::State(registry): axum::extract::State<Registry>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
