//! Hot-reloadable OpenTelemetry runtime.
//!
//! This crate owns a complete telemetry stack (tracer and meter providers,
//! OTLP exporters, instrumentation helpers and a diagnostics endpoint) and
//! replaces it atomically whenever its configuration changes, without ever
//! leaving the process without a working stack.
//!
//! # Architecture
//!
//! - [`RuntimeInstance`] is one immutable stack built from one [`Config`].
//! - [`Client`] holds the current instance, watches the configuration file,
//!   and swaps in a new instance after a debounced, digest-checked reload.
//!   The superseded instance is drained with a bounded timeout.
//! - Exporters are wrapped so that failed exports are counted per signal
//!   and surfaced through [`Snapshot`] and the `/observe/status` endpoint.
//!
//! # Example
//!
//! ```no_run
//! use observe_config::ConfigLoader;
//! use observe_runtime::{Client, init_logging};
//! use opentelemetry::trace::{Span, Tracer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let source = ConfigLoader::new().with_file("/etc/observe/observe.yaml").build();
//! let logs = init_logging(&Default::default())?;
//!
//! let client = Client::builder()
//!     .source(source)
//!     .log_handle(logs)
//!     .init()
//!     .await?;
//!
//! let mut span = client.current().tracer("billing").start("charge");
//! span.end();
//!
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Lifecycle logging
//!
//! Lifecycle events are logged with target `observe_lifecycle`, exporter
//! failures with `observe_exporter`, file watching with `observe_watcher`
//! and the diagnostics listener with `observe_diagnostics`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod diagnostics;
mod error;
mod exporter;
mod instrumentation;
mod logging;
mod provider;
mod resource;
mod retry;
mod runtime;
mod runtime_metrics;
mod sampler;
mod stats;
mod tls;
mod watcher;

#[cfg(test)]
mod test_support;

pub use client::{Client, ClientBuilder, DEFAULT_SHUTDOWN_TIMEOUT, ReloadOutcome};
pub use diagnostics::{
    DiagnosticsServer, InstrumentationFlags, STATUS_PATH, Snapshot, SnapshotProvider,
};
pub use error::{BoxError, Error, Result, ShutdownError};
pub use retry::RetryGate;
pub use exporter::{
    BoxedMetricExporter, BoxedSpanExporter, ExporterBundle, ExporterFactory,
    OtlpExporterFactory, StatsMetricExporter, StatsSpanExporter,
};
pub use instrumentation::{
    GrpcInstrumentation, HttpInstrumentation, MessagingInstrumentation, ResponseFuture,
    SqlInstrumentation, TraceLayer, TraceService,
};
pub use logging::{LogHandle, init_logging};
pub use provider::ProviderSet;
pub use resource::{HostDetector, ProcessDetector, build_resource};
pub use runtime::{BuildContext, RuntimeInstance};
pub use runtime_metrics::SCOPE as RUNTIME_METRICS_SCOPE;
pub use sampler::build_sampler;
pub use stats::{DEFAULT_QUEUE_LIMIT, ExportErrorRecord, ExporterStats, ExporterStatus, Signal};
pub use tls::TlsMaterial;
pub use watcher::{
    ConfigWatcher, DEFAULT_DEBOUNCE, Debouncer, EventOutcome, WatcherHandle, run_change_loop,
};

pub use observe_config::{Config, ConfigDigest};
