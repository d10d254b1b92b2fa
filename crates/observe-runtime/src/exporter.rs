//! Exporter construction and health tracking.
//!
//! Every exporter handed to the SDK is wrapped in a stats decorator that
//! counts the items of failed export calls and remembers the latest error.
//! Failed calls are retried with backoff per the bundle's [`RetryGate`];
//! once retries are exhausted the failure ends there. The SDK sees a
//! successful export, so an unreachable collector never surfaces as a flush
//! or shutdown error.

use crate::error::{Error, Result};
use crate::retry::RetryGate;
use crate::stats::{ExporterStats, Signal};
use crate::tls::TlsMaterial;
use observe_config::{Compression, OtlpConfig, Protocol};
use opentelemetry_otlp::{WithExportConfig, WithHttpConfig, WithTonicConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::metrics::Temporality;
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tonic::metadata::{MetadataKey, MetadataMap, MetadataValue};

type ExportFuture<'a> = Pin<Box<dyn Future<Output = OTelSdkResult> + Send + 'a>>;

trait DynSpanExporter: Send + Sync + fmt::Debug {
    fn dyn_export(&self, batch: Vec<SpanData>) -> ExportFuture<'_>;
    fn dyn_shutdown(&mut self, timeout: Duration) -> OTelSdkResult;
    fn dyn_force_flush(&mut self) -> OTelSdkResult;
    fn dyn_set_resource(&mut self, resource: &Resource);
}

impl<E: SpanExporter + 'static> DynSpanExporter for E {
    fn dyn_export(&self, batch: Vec<SpanData>) -> ExportFuture<'_> {
        Box::pin(self.export(batch))
    }

    fn dyn_shutdown(&mut self, timeout: Duration) -> OTelSdkResult {
        self.shutdown_with_timeout(timeout)
    }

    fn dyn_force_flush(&mut self) -> OTelSdkResult {
        self.force_flush()
    }

    fn dyn_set_resource(&mut self, resource: &Resource) {
        self.set_resource(resource);
    }
}

/// A span exporter with its concrete type erased.
#[derive(Debug)]
pub struct BoxedSpanExporter(Box<dyn DynSpanExporter>);

impl BoxedSpanExporter {
    /// Erases the type of a span exporter.
    pub fn new<E: SpanExporter + 'static>(exporter: E) -> Self {
        Self(Box::new(exporter))
    }
}

impl SpanExporter for BoxedSpanExporter {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        self.0.dyn_export(batch)
    }

    fn shutdown_with_timeout(&mut self, timeout: Duration) -> OTelSdkResult {
        self.0.dyn_shutdown(timeout)
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        self.0.dyn_force_flush()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.0.dyn_set_resource(resource);
    }
}

trait DynMetricExporter: Send + Sync + 'static {
    fn dyn_export<'a>(&'a self, metrics: &'a ResourceMetrics) -> ExportFuture<'a>;
    fn dyn_force_flush(&self) -> OTelSdkResult;
    fn dyn_shutdown(&self, timeout: Duration) -> OTelSdkResult;
    fn dyn_temporality(&self) -> Temporality;
}

impl<E: PushMetricExporter> DynMetricExporter for E {
    fn dyn_export<'a>(&'a self, metrics: &'a ResourceMetrics) -> ExportFuture<'a> {
        Box::pin(self.export(metrics))
    }

    fn dyn_force_flush(&self) -> OTelSdkResult {
        self.force_flush()
    }

    fn dyn_shutdown(&self, timeout: Duration) -> OTelSdkResult {
        self.shutdown_with_timeout(timeout)
    }

    fn dyn_temporality(&self) -> Temporality {
        self.temporality()
    }
}

/// A push metric exporter with its concrete type erased.
pub struct BoxedMetricExporter(Box<dyn DynMetricExporter>);

impl BoxedMetricExporter {
    /// Erases the type of a metric exporter.
    pub fn new<E: PushMetricExporter>(exporter: E) -> Self {
        Self(Box::new(exporter))
    }
}

impl fmt::Debug for BoxedMetricExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedMetricExporter").finish_non_exhaustive()
    }
}

impl PushMetricExporter for BoxedMetricExporter {
    fn export(&self, metrics: &ResourceMetrics) -> impl Future<Output = OTelSdkResult> + Send {
        async move { self.0.dyn_export(metrics).await }
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.0.dyn_force_flush()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.0.dyn_shutdown(timeout)
    }

    fn temporality(&self) -> Temporality {
        self.0.dyn_temporality()
    }
}

/// Span exporter decorator that retries and records failed exports.
#[derive(Debug)]
pub struct StatsSpanExporter {
    inner: BoxedSpanExporter,
    stats: Arc<ExporterStats>,
    retry: Arc<RetryGate>,
}

impl StatsSpanExporter {
    /// Wraps an exporter, reporting into `stats`, without retries.
    pub fn new(inner: BoxedSpanExporter, stats: Arc<ExporterStats>) -> Self {
        Self {
            inner,
            stats,
            retry: Arc::default(),
        }
    }

    /// Retries failed exports through `retry`.
    pub fn with_retry(mut self, retry: Arc<RetryGate>) -> Self {
        self.retry = retry;
        self
    }
}

impl SpanExporter for StatsSpanExporter {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        async move {
            let records = batch.len();
            let mut backoff = self.retry.backoff();
            let mut attempt = 1u32;
            loop {
                let Err(e) = self.inner.export(batch.clone()).await else {
                    return Ok(());
                };
                if backoff.wait() {
                    tracing::debug!(
                        target: "observe_exporter",
                        signal = Signal::Traces.as_str(),
                        attempt,
                        error = %e,
                        "Span export attempt failed, retrying"
                    );
                    attempt += 1;
                    continue;
                }

                self.stats.record_failure(records, e.to_string());
                tracing::warn!(
                    target: "observe_exporter",
                    signal = Signal::Traces.as_str(),
                    records,
                    attempts = attempt,
                    error = %e,
                    "Span export failed"
                );
                return Ok(());
            }
        }
    }

    fn shutdown_with_timeout(&mut self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }

    fn force_flush(&mut self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.inner.set_resource(resource);
    }
}

/// Metric exporter decorator that retries and records failed exports.
#[derive(Debug)]
pub struct StatsMetricExporter {
    inner: BoxedMetricExporter,
    stats: Arc<ExporterStats>,
    retry: Arc<RetryGate>,
}

impl StatsMetricExporter {
    /// Wraps an exporter, reporting into `stats`, without retries.
    pub fn new(inner: BoxedMetricExporter, stats: Arc<ExporterStats>) -> Self {
        Self {
            inner,
            stats,
            retry: Arc::default(),
        }
    }

    /// Retries failed exports through `retry`.
    pub fn with_retry(mut self, retry: Arc<RetryGate>) -> Self {
        self.retry = retry;
        self
    }
}

impl PushMetricExporter for StatsMetricExporter {
    fn export(&self, metrics: &ResourceMetrics) -> impl Future<Output = OTelSdkResult> + Send {
        let records: usize = metrics
            .scope_metrics()
            .map(|scope| scope.metrics().count())
            .sum();

        async move {
            let mut backoff = self.retry.backoff();
            loop {
                let Err(e) = self.inner.export(metrics).await else {
                    return Ok(());
                };
                if backoff.wait() {
                    continue;
                }

                self.stats.record_failure(records, e.to_string());
                tracing::warn!(
                    target: "observe_exporter",
                    signal = Signal::Metrics.as_str(),
                    records,
                    error = %e,
                    "Metric export failed"
                );
                return Ok(());
            }
        }
    }

    fn force_flush(&self) -> OTelSdkResult {
        self.inner.force_flush()
    }

    fn shutdown_with_timeout(&self, timeout: Duration) -> OTelSdkResult {
        self.inner.shutdown_with_timeout(timeout)
    }

    fn temporality(&self) -> Temporality {
        self.inner.temporality()
    }
}

/// Builds the raw exporters for a bundle.
///
/// The default [`OtlpExporterFactory`] talks OTLP. Other implementations
/// can substitute in-process exporters.
pub trait ExporterFactory: Send + Sync {
    /// Builds the span exporter.
    ///
    /// # Errors
    ///
    /// Returns a construction error if the exporter cannot be created.
    fn span_exporter(
        &self,
        config: &OtlpConfig,
        tls: Option<&TlsMaterial>,
    ) -> Result<BoxedSpanExporter>;

    /// Builds the metric exporter.
    ///
    /// # Errors
    ///
    /// Returns a construction error if the exporter cannot be created.
    fn metric_exporter(
        &self,
        config: &OtlpConfig,
        tls: Option<&TlsMaterial>,
    ) -> Result<BoxedMetricExporter>;
}

/// Builds OTLP exporters over gRPC (tonic) or HTTP (reqwest).
#[derive(Debug, Clone, Copy, Default)]
pub struct OtlpExporterFactory;

impl ExporterFactory for OtlpExporterFactory {
    fn span_exporter(
        &self,
        config: &OtlpConfig,
        tls: Option<&TlsMaterial>,
    ) -> Result<BoxedSpanExporter> {
        let endpoint = endpoint_url(config, tls.is_some());
        let exporter = match config.protocol {
            Protocol::Grpc => {
                let mut builder = opentelemetry_otlp::SpanExporter::builder()
                    .with_tonic()
                    .with_endpoint(&endpoint)
                    .with_timeout(config.timeout);

                if !config.headers.is_empty() {
                    builder = builder.with_metadata(grpc_metadata(config));
                }
                if config.compression == Compression::Gzip {
                    builder = builder.with_compression(opentelemetry_otlp::Compression::Gzip);
                }
                if let Some(tls) = tls {
                    builder = builder.with_tls_config(tls.grpc_config());
                }

                builder.build()
            }
            Protocol::Http => {
                let mut builder = opentelemetry_otlp::SpanExporter::builder()
                    .with_http()
                    .with_endpoint(http_signal_endpoint(&endpoint, "/v1/traces"))
                    .with_timeout(config.timeout)
                    .with_protocol(opentelemetry_otlp::Protocol::HttpBinary);

                if !config.headers.is_empty() {
                    builder = builder.with_headers(http_headers(config));
                }
                if config.compression == Compression::Gzip {
                    builder = builder.with_compression(opentelemetry_otlp::Compression::Gzip);
                }
                if let Some(tls) = tls {
                    builder = builder.with_http_client(tls.http_client(config.timeout)?);
                }

                builder.build()
            }
        }
        .map_err(|e| Error::construction("span exporter", e))?;

        Ok(BoxedSpanExporter::new(exporter))
    }

    fn metric_exporter(
        &self,
        config: &OtlpConfig,
        tls: Option<&TlsMaterial>,
    ) -> Result<BoxedMetricExporter> {
        let endpoint = endpoint_url(config, tls.is_some());
        let exporter = match config.protocol {
            Protocol::Grpc => {
                let mut builder = opentelemetry_otlp::MetricExporter::builder()
                    .with_tonic()
                    .with_endpoint(&endpoint)
                    .with_timeout(config.timeout);

                if !config.headers.is_empty() {
                    builder = builder.with_metadata(grpc_metadata(config));
                }
                if config.compression == Compression::Gzip {
                    builder = builder.with_compression(opentelemetry_otlp::Compression::Gzip);
                }
                if let Some(tls) = tls {
                    builder = builder.with_tls_config(tls.grpc_config());
                }

                builder.build()
            }
            Protocol::Http => {
                let mut builder = opentelemetry_otlp::MetricExporter::builder()
                    .with_http()
                    .with_endpoint(http_signal_endpoint(&endpoint, "/v1/metrics"))
                    .with_timeout(config.timeout)
                    .with_protocol(opentelemetry_otlp::Protocol::HttpBinary);

                if !config.headers.is_empty() {
                    builder = builder.with_headers(http_headers(config));
                }
                if config.compression == Compression::Gzip {
                    builder = builder.with_compression(opentelemetry_otlp::Compression::Gzip);
                }
                if let Some(tls) = tls {
                    builder = builder.with_http_client(tls.http_client(config.timeout)?);
                }

                builder.build()
            }
        }
        .map_err(|e| Error::construction("metric exporter", e))?;

        Ok(BoxedMetricExporter::new(exporter))
    }
}

/// Exporters for every signal plus their health counters.
///
/// The exporters are moved into the SDK providers when the
/// [`ProviderSet`](crate::ProviderSet) is built; shutting the providers down
/// shuts the exporters down with them. The stats stay reachable through
/// [`ExporterBundle::trace_stats`] and [`ExporterBundle::metric_stats`].
#[derive(Debug)]
pub struct ExporterBundle {
    pub(crate) span_exporter: StatsSpanExporter,
    pub(crate) metric_exporter: StatsMetricExporter,
    pub(crate) retry: Arc<RetryGate>,
    trace_stats: Arc<ExporterStats>,
    metric_stats: Arc<ExporterStats>,
}

impl ExporterBundle {
    /// Loads TLS material and builds one decorated exporter per signal.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing endpoint or a partial
    /// client certificate pair, and a construction error when TLS files or
    /// exporters cannot be built.
    pub fn new(config: &OtlpConfig, factory: &dyn ExporterFactory) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(Error::invalid("exporters.otlp.endpoint", "must not be empty"));
        }

        let tls = TlsMaterial::load(&config.tls)?;
        let trace_stats = Arc::new(ExporterStats::new(
            Signal::Traces,
            config.protocol,
            config.endpoint.clone(),
            config.batch.max_queue_size,
        ));
        let metric_stats = Arc::new(ExporterStats::new(
            Signal::Metrics,
            config.protocol,
            config.endpoint.clone(),
            0,
        ));

        let retry = Arc::new(RetryGate::new(&config.retry));
        let span_exporter = StatsSpanExporter::new(
            factory.span_exporter(config, tls.as_ref())?,
            Arc::clone(&trace_stats),
        )
        .with_retry(Arc::clone(&retry));
        let metric_exporter = StatsMetricExporter::new(
            factory.metric_exporter(config, tls.as_ref())?,
            Arc::clone(&metric_stats),
        )
        .with_retry(Arc::clone(&retry));

        Ok(Self {
            span_exporter,
            metric_exporter,
            retry,
            trace_stats,
            metric_stats,
        })
    }

    /// Health counters of the span exporter.
    pub fn trace_stats(&self) -> &Arc<ExporterStats> {
        &self.trace_stats
    }

    /// Health counters of the metric exporter.
    pub fn metric_stats(&self) -> &Arc<ExporterStats> {
        &self.metric_stats
    }
}

fn endpoint_url(config: &OtlpConfig, tls: bool) -> String {
    let endpoint = config.endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        return endpoint.to_string();
    }

    let scheme = if config.insecure && !tls { "http" } else { "https" };
    format!("{scheme}://{endpoint}")
}

fn http_signal_endpoint(endpoint: &str, path: &str) -> String {
    if endpoint.ends_with(path) {
        endpoint.to_string()
    } else {
        format!("{endpoint}{path}")
    }
}

fn grpc_metadata(config: &OtlpConfig) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    for (key, value) in &config.headers {
        if let (Ok(k), Ok(v)) = (
            key.parse::<MetadataKey<_>>(),
            value.parse::<MetadataValue<_>>(),
        ) {
            metadata.insert(k, v);
        } else {
            tracing::warn!(header = %key, "Skipping invalid OTLP gRPC metadata entry");
        }
    }
    metadata
}

fn http_headers(config: &OtlpConfig) -> HashMap<String, String> {
    config
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
