//! One complete telemetry stack bound to one configuration.
//!
//! A [`RuntimeInstance`] never changes after construction. A configuration
//! change produces a new instance, and the old one is retired with
//! [`RuntimeInstance::shutdown`].

use crate::diagnostics::{DiagnosticsServer, InstrumentationFlags, Snapshot, SnapshotProvider};
use crate::error::{Result, ShutdownError};
use crate::exporter::{ExporterBundle, ExporterFactory, OtlpExporterFactory};
use crate::instrumentation::{
    GrpcInstrumentation, HttpInstrumentation, Instrumentation, MessagingInstrumentation,
    SqlInstrumentation,
};
use crate::provider::ProviderSet;
use crate::resource::build_resource;
use crate::runtime_metrics::{self, RuntimeMetrics};
use crate::sampler::build_sampler;
use crate::stats::ExporterStats;
use chrono::{DateTime, Utc};
use observe_config::{Config, ConfigDigest};
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Inputs to [`RuntimeInstance::build`] that do not come from the
/// configuration.
#[derive(Clone)]
#[must_use]
pub struct BuildContext {
    factory: Arc<dyn ExporterFactory>,
    started_at: DateTime<Utc>,
    generation: u64,
    snapshot_provider: Option<Arc<dyn SnapshotProvider>>,
    inherit_diagnostics: bool,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new(Arc::new(OtlpExporterFactory))
    }
}

impl BuildContext {
    /// Starts a context using `factory` for exporters.
    pub fn new(factory: Arc<dyn ExporterFactory>) -> Self {
        Self {
            factory,
            started_at: Utc::now(),
            generation: 0,
            snapshot_provider: None,
            inherit_diagnostics: false,
        }
    }

    /// Number of successful reloads preceding this build.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Time the owning client first booted.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Source of snapshots for a diagnostics listener started by the build.
    ///
    /// Without one, diagnostics are not served even when enabled.
    pub fn with_snapshot_provider(mut self, provider: Arc<dyn SnapshotProvider>) -> Self {
        self.snapshot_provider = Some(provider);
        self
    }

    /// Skips binding diagnostics because the caller hands over an existing
    /// listener with [`RuntimeInstance::adopt_diagnostics`].
    pub(crate) fn inherit_diagnostics(mut self, inherit: bool) -> Self {
        self.inherit_diagnostics = inherit;
        self
    }
}

/// Providers, exporters and helpers built from one configuration.
pub struct RuntimeInstance {
    config: Config,
    digest: ConfigDigest,
    generation: u64,
    started_at: DateTime<Utc>,
    loaded_at: DateTime<Utc>,
    providers: ProviderSet,
    trace_stats: Arc<ExporterStats>,
    metric_stats: Arc<ExporterStats>,
    instrumentation: Instrumentation,
    _runtime_metrics: Option<RuntimeMetrics>,
    diagnostics: Mutex<Option<DiagnosticsServer>>,
    shut_down: AtomicBool,
}

impl RuntimeInstance {
    /// Builds every component described by `config`.
    ///
    /// The configuration is validated first, so the sampler and exporter
    /// settings are checked before anything is constructed. A failure after
    /// the providers exist shuts them down again before returning.
    ///
    /// This does not register the providers globally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`](crate::Error::Configuration) for invalid settings and
    /// [`Error::Construction`](crate::Error::Construction) when a component cannot be built.
    pub fn build(config: Config, context: &BuildContext) -> Result<Self> {
        config.validate()?;
        let digest = ConfigDigest::of(&config)?;

        let resource = build_resource(&config.service);
        let sampler = build_sampler(&config.sampling)?;
        let bundle = ExporterBundle::new(&config.exporters.otlp, context.factory.as_ref())?;
        let trace_stats = Arc::clone(bundle.trace_stats());
        let metric_stats = Arc::clone(bundle.metric_stats());
        let providers = ProviderSet::build(&config.exporters.otlp, resource, sampler, bundle);

        let parts = Self::build_helpers(&config, context, &providers, &trace_stats, &metric_stats);
        let (instrumentation, runtime_metrics, diagnostics) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(shutdown_err) = providers.shutdown() {
                    tracing::debug!(target: "observe_lifecycle", error = %shutdown_err, "Failed to release providers of abandoned build");
                }
                return Err(e);
            }
        };

        tracing::debug!(
            target: "observe_lifecycle",
            generation = context.generation,
            digest = %digest,
            "Runtime instance built"
        );

        Ok(Self {
            config,
            digest,
            generation: context.generation,
            started_at: context.started_at,
            loaded_at: Utc::now(),
            providers,
            trace_stats,
            metric_stats,
            instrumentation,
            _runtime_metrics: runtime_metrics,
            diagnostics: Mutex::new(diagnostics),
            shut_down: AtomicBool::new(false),
        })
    }

    fn build_helpers(
        config: &Config,
        context: &BuildContext,
        providers: &ProviderSet,
        trace_stats: &Arc<ExporterStats>,
        metric_stats: &Arc<ExporterStats>,
    ) -> Result<(Instrumentation, Option<RuntimeMetrics>, Option<DiagnosticsServer>)> {
        let instrumentation = Instrumentation::build(&config.instrumentation, providers)?;

        let runtime_metrics = config.instrumentation.runtime_metrics.enabled.then(|| {
            RuntimeMetrics::register(
                &providers.meter_provider().meter(runtime_metrics::SCOPE),
                context.generation,
                &config.instrumentation,
                Arc::clone(trace_stats),
                Arc::clone(metric_stats),
            )
        });

        let diagnostics = match (&context.snapshot_provider, config.diagnostics.enabled) {
            (Some(provider), true) if !context.inherit_diagnostics => Some(
                DiagnosticsServer::start(&config.diagnostics.http_addr, Arc::clone(provider))?,
            ),
            _ => None,
        };

        Ok((instrumentation, runtime_metrics, diagnostics))
    }

    /// The configuration this instance was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Digest of [`RuntimeInstance::config`].
    pub fn digest(&self) -> ConfigDigest {
        self.digest
    }

    /// Successful reloads that preceded this instance. Zero for the boot instance.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When this instance was built.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// The tracer provider.
    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        self.providers.tracer_provider()
    }

    /// The meter provider.
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        self.providers.meter_provider()
    }

    /// A tracer for instrumentation scope `name`.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> SdkTracer {
        self.providers.tracer_provider().tracer(name)
    }

    /// A meter for instrumentation scope `name`.
    pub fn meter(&self, name: &'static str) -> Meter {
        self.providers.meter_provider().meter(name)
    }

    /// HTTP helper, `None` when disabled.
    pub fn http(&self) -> Option<&HttpInstrumentation> {
        self.instrumentation.http.as_ref()
    }

    /// gRPC helper, `None` when disabled.
    pub fn grpc(&self) -> Option<&GrpcInstrumentation> {
        self.instrumentation.grpc.as_ref()
    }

    /// SQL helper, `None` when disabled.
    pub fn sql(&self) -> Option<&SqlInstrumentation> {
        self.instrumentation.sql.as_ref()
    }

    /// Messaging helper, `None` when disabled.
    pub fn messaging(&self) -> Option<&MessagingInstrumentation> {
        self.instrumentation.messaging.as_ref()
    }

    /// Trace exporter health counters.
    pub fn trace_stats(&self) -> &Arc<ExporterStats> {
        &self.trace_stats
    }

    /// Metric exporter health counters.
    pub fn metric_stats(&self) -> &Arc<ExporterStats> {
        &self.metric_stats
    }

    /// Address of the diagnostics listener owned by this instance.
    pub fn diagnostics_addr(&self) -> Option<std::net::SocketAddr> {
        self.diagnostics.lock().as_ref().map(DiagnosticsServer::local_addr)
    }

    /// Exports everything buffered so far.
    pub fn flush(&self) {
        self.providers.flush();
    }

    /// Projects the instance's state for diagnostics.
    pub fn snapshot(&self) -> Snapshot {
        let instrumentation = &self.config.instrumentation;
        Snapshot {
            service_name: self.config.service.name.clone(),
            service_version: self.config.service.version.clone(),
            environment: self.config.service.environment.clone(),
            sampling_mode: self.config.sampling.mode.to_string(),
            exporter_endpoint: self.config.exporters.otlp.endpoint.clone(),
            start_time: self.started_at,
            last_reload_time: (self.generation > 0).then_some(self.loaded_at),
            instrumentation: InstrumentationFlags {
                http: instrumentation.http.enabled,
                grpc: instrumentation.grpc.enabled,
                sql: instrumentation.sql.enabled,
                messaging: instrumentation.messaging.enabled,
                runtime_metrics: instrumentation.runtime_metrics.enabled,
            },
            config_reload_count: self.generation,
            trace_queue_limit: self.trace_stats.queue_limit(),
            trace_dropped_spans: self.trace_stats.dropped(),
            trace_exporter: self.trace_stats.status(),
            metric_exporter: self.metric_stats.status(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this instance owns a diagnostics listener configured for `addr`.
    pub(crate) fn serves_diagnostics_on(&self, addr: &str) -> bool {
        self.diagnostics
            .lock()
            .as_ref()
            .is_some_and(|server| server.configured_addr() == addr)
    }

    /// Releases the diagnostics listener if it serves `addr`.
    pub(crate) fn take_diagnostics(&self, addr: &str) -> Option<DiagnosticsServer> {
        let mut slot = self.diagnostics.lock();
        if slot.as_ref().is_some_and(|server| server.configured_addr() == addr) {
            slot.take()
        } else {
            None
        }
    }

    pub(crate) fn adopt_diagnostics(&self, server: DiagnosticsServer) {
        *self.diagnostics.lock() = Some(server);
    }

    /// Whether [`RuntimeInstance::shutdown`] has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Flushes and shuts down the providers, then stops diagnostics.
    ///
    /// Every step is attempted. Only the first call does any work; later
    /// calls return `Ok(())`. This blocks while exporters drain.
    ///
    /// # Errors
    ///
    /// Returns the joined failures of the first call.
    pub fn shutdown(&self) -> std::result::Result<(), ShutdownError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut errors = Vec::new();
        if let Err(e) = self.providers.shutdown() {
            errors.push(e);
        }

        if let Some(mut server) = self.diagnostics.lock().take() {
            server.shutdown();
        }

        tracing::debug!(target: "observe_lifecycle", generation = self.generation, "Runtime instance shut down");
        ShutdownError::join(errors)
    }
}

impl fmt::Debug for RuntimeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeInstance")
            .field("service", &self.config.service.name)
            .field("generation", &self.generation)
            .field("digest", &self.digest)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
