//! Diagnostics HTTP endpoint.
//!
//! `GET /observe/status` returns a JSON [`Snapshot`] of whichever runtime
//! instance is current at request time. When an auth token is configured
//! the request must carry `Authorization: Bearer <token>`.

use crate::error::{Error, Result};
use crate::stats::ExporterStatus;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Path served by the diagnostics listener.
pub const STATUS_PATH: &str = "/observe/status";

/// Point-in-time view of the active runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// `service.name` of the current configuration.
    pub service_name: String,
    /// `service.version` of the current configuration.
    pub service_version: String,
    /// Deployment environment.
    pub environment: String,
    /// Sampling mode in its configuration spelling.
    pub sampling_mode: String,
    /// OTLP collector endpoint.
    pub exporter_endpoint: String,
    /// When the client booted its first instance.
    pub start_time: DateTime<Utc>,
    /// When the current instance replaced its predecessor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reload_time: Option<DateTime<Utc>>,
    /// Enabled instrumentation modules.
    pub instrumentation: InstrumentationFlags,
    /// Successful reloads since boot.
    pub config_reload_count: u64,
    /// Span queue limit of the trace exporter.
    pub trace_queue_limit: usize,
    /// Spans lost to failed exports.
    pub trace_dropped_spans: u64,
    /// Trace exporter health.
    pub trace_exporter: ExporterStatus,
    /// Metric exporter health.
    pub metric_exporter: ExporterStatus,
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,
}

/// Which instrumentation modules are enabled.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InstrumentationFlags {
    pub http: bool,
    pub grpc: bool,
    pub sql: bool,
    pub messaging: bool,
    pub runtime_metrics: bool,
}

/// Source of snapshots for the diagnostics listener.
///
/// Both methods are consulted on every request so that a listener which
/// outlives the instance that started it reflects the current one.
pub trait SnapshotProvider: Send + Sync + 'static {
    /// The current snapshot, or `None` when no runtime is available.
    fn snapshot(&self) -> Option<Snapshot>;

    /// Token expected in the bearer header. Empty or `None` disables auth.
    fn auth_token(&self) -> Option<String>;
}

/// A running diagnostics listener.
#[derive(Debug)]
pub struct DiagnosticsServer {
    configured_addr: String,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl DiagnosticsServer {
    /// Binds `addr` and starts serving on the ambient tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a construction error when no runtime is available or the
    /// address cannot be bound.
    pub fn start(addr: &str, provider: Arc<dyn SnapshotProvider>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::construction("diagnostics listener", e))?;

        let listener = std::net::TcpListener::bind(addr)
            .and_then(|listener| {
                listener.set_nonblocking(true)?;
                Ok(listener)
            })
            .map_err(|e| Error::construction("diagnostics listener", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::construction("diagnostics listener", e))?;

        let app = Router::new()
            .route(STATUS_PATH, get(handle_status))
            .with_state(provider);

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = runtime.spawn(async move {
            let listener = match tokio::net::TcpListener::from_std(listener) {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(target: "observe_diagnostics", error = %e, "Failed to register diagnostics listener");
                    return;
                }
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(target: "observe_diagnostics", error = %e, "Diagnostics server failed");
            }
        });

        tracing::info!(target: "observe_diagnostics", addr = %local_addr, "Diagnostics listener started");

        Ok(Self {
            configured_addr: addr.to_string(),
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    /// The address as written in the configuration.
    pub fn configured_addr(&self) -> &str {
        &self.configured_addr
    }

    /// The bound address, with the real port when `:0` was configured.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections. In-flight requests finish on their own.
    pub fn shutdown(&mut self) {
        if self.task.take().is_some() {
            self.cancel.cancel();
            tracing::debug!(target: "observe_diagnostics", addr = %self.local_addr, "Diagnostics listener stopped");
        }
    }
}

impl Drop for DiagnosticsServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn handle_status(
    State(provider): State<Arc<dyn SnapshotProvider>>,
    headers: HeaderMap,
) -> Response {
    if let Some(expected) = provider
        .auth_token()
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
    {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim);

        if presented != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    match provider.snapshot() {
        Some(snapshot) => Json(snapshot).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
