//! HTTP surface for probes and query clients.
//!
//! Probes POST partial reports; clients read the merged aggregate and ask
//! for per-node connection tables. All query work runs against one
//! immutable snapshot taken at the start of the request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::ApiConfig;
use crate::export::health::HealthMetrics;
use crate::report::{Report, TopologyKind};
use crate::summary::{incoming_summary, outgoing_summary, ConnectionsSummary, SummaryColumns};

/// Why a request was turned away. Degradations inside merge and query are
/// silent; only the request surface itself rejects.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown topology: {0}")]
    UnknownTopology(String),

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("malformed report: {0}")]
    MalformedReport(#[from] serde_json::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownTopology(_) | Self::NodeNotFound(_) => StatusCode::NOT_FOUND,
            Self::MalformedReport(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Incoming and outgoing connection tables for one node.
#[derive(Debug, Serialize)]
pub struct NodeConnections {
    pub incoming: ConnectionsSummary,
    pub outgoing: ConnectionsSummary,
}

struct AppState {
    aggregator: Arc<Aggregator>,
    health: Arc<HealthMetrics>,
    columns: SummaryColumns,
}

/// The report ingest + query server.
pub struct ApiServer {
    addr: String,
    shutdown_timeout: Duration,
    state: Arc<AppState>,
    shutdown: parking_lot::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ApiServer {
    /// Creates a server; nothing is bound until [`start`](Self::start).
    pub fn new(cfg: &ApiConfig, aggregator: Arc<Aggregator>, health: Arc<HealthMetrics>) -> Self {
        Self {
            addr: cfg.addr.clone(),
            shutdown_timeout: cfg.shutdown_timeout,
            state: Arc::new(AppState {
                aggregator,
                health,
                columns: SummaryColumns::default(),
            }),
            shutdown: parking_lot::Mutex::new(None),
        }
    }

    /// Binds the listen address and starts serving.
    pub async fn start(&self) -> Result<()> {
        // Parse address, handling ":port" shorthand.
        let bind_addr = if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        };

        let app = Router::new()
            .route("/api/report", post(ingest_report).get(get_report))
            .route(
                "/api/topology/{topology}/nodes/{id}/connections",
                get(node_connections),
            )
            .with_state(self.state.clone());

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        let serve_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            info!(addr = %local_addr, "api server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    serve_cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                error!(error = %e, "api server error");
            }
        });

        *self.shutdown.lock() = Some((cancel, handle));

        Ok(())
    }

    /// Gracefully shuts down, waiting up to the configured timeout for
    /// in-flight requests to drain.
    pub async fn stop(&self) -> Result<()> {
        let Some((cancel, handle)) = self.shutdown.lock().take() else {
            return Ok(());
        };

        cancel.cancel();
        if tokio::time::timeout(self.shutdown_timeout, handle)
            .await
            .is_err()
        {
            warn!("api server did not drain before shutdown timeout");
        }

        Ok(())
    }
}

/// POST /api/report - fold one partial report into the aggregate.
async fn ingest_report(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let report: Report = match serde_json::from_slice(&body) {
        Ok(report) => report,
        Err(e) => {
            state.health.reports_rejected.inc();
            return Err(ApiError::from(e));
        }
    };

    state.health.reports_received.inc();
    let timer = state.health.merge_duration.start_timer();
    state.aggregator.submit(&report);
    timer.observe_duration();

    state.health.observe_aggregate(&state.aggregator.snapshot());

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/report - the current aggregate snapshot.
async fn get_report(State(state): State<Arc<AppState>>) -> Response {
    let snapshot = state.aggregator.snapshot();
    match serde_json::to_string(&*snapshot) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "serializing report snapshot");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /api/topology/{topology}/nodes/{id}/connections - incoming and
/// outgoing connection tables for one node.
async fn node_connections(
    State(state): State<Arc<AppState>>,
    Path((topology, id)): Path<(String, String)>,
) -> Result<Json<NodeConnections>, ApiError> {
    let Some(kind) = TopologyKind::from_str(&topology) else {
        return Err(ApiError::UnknownTopology(topology));
    };

    let snapshot = state.aggregator.snapshot();
    let nodes = snapshot.topology(kind);
    let Some(node) = nodes.node(&id) else {
        return Err(ApiError::NodeNotFound(id));
    };

    state
        .health
        .summary_queries
        .with_label_values(&[kind.as_str()])
        .inc();

    Ok(Json(NodeConnections {
        incoming: incoming_summary(&state.columns, &snapshot, kind.as_str(), node, nodes),
        outgoing: outgoing_summary(&state.columns, &snapshot, kind.as_str(), node, nodes),
    }))
}
