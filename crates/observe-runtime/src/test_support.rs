use crate::error::Result;
use crate::exporter::{BoxedMetricExporter, BoxedSpanExporter, ExporterFactory};
use crate::tls::TlsMaterial;
use observe_config::OtlpConfig;
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::metrics::data::ResourceMetrics;
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, Temporality};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData, SpanExporter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct FailingSpanExporter;

impl SpanExporter for FailingSpanExporter {
    async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
        Err(OTelSdkError::InternalFailure(
            "connection refused".to_string(),
        ))
    }
}

#[derive(Debug, Default)]
pub(crate) struct FailingMetricExporter;

impl PushMetricExporter for FailingMetricExporter {
    async fn export(&self, _metrics: &ResourceMetrics) -> OTelSdkResult {
        Err(OTelSdkError::InternalFailure(
            "connection refused".to_string(),
        ))
    }

    fn force_flush(&self) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&self, _timeout: Duration) -> OTelSdkResult {
        Ok(())
    }

    fn temporality(&self) -> Temporality {
        Temporality::Cumulative
    }
}

/// Span exporter whose shutdown hangs for `delay`.
#[derive(Debug)]
pub(crate) struct StallingSpanExporter {
    delay: Duration,
}

impl SpanExporter for StallingSpanExporter {
    async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
        Ok(())
    }

    fn shutdown_with_timeout(&mut self, _timeout: Duration) -> OTelSdkResult {
        std::thread::sleep(self.delay);
        Ok(())
    }
}

#[derive(Clone, Copy, Default)]
enum Mode {
    #[default]
    Healthy,
    Failing,
    Stalling(Duration),
}

/// Factory handing out in-memory exporters and counting constructions.
#[derive(Clone, Default)]
pub(crate) struct InMemoryFactory {
    spans: InMemorySpanExporter,
    metrics: InMemoryMetricExporter,
    builds: Arc<AtomicUsize>,
    mode: Mode,
}

impl InMemoryFactory {
    /// Every export fails.
    pub(crate) fn failing() -> Self {
        Self {
            mode: Mode::Failing,
            ..Self::default()
        }
    }

    /// Span exporter shutdown blocks for `delay`.
    pub(crate) fn stalling(delay: Duration) -> Self {
        Self {
            mode: Mode::Stalling(delay),
            ..Self::default()
        }
    }

    pub(crate) fn spans(&self) -> Vec<SpanData> {
        self.spans.get_finished_spans().unwrap_or_default()
    }

    pub(crate) fn metric_names(&self) -> Vec<String> {
        self.metrics
            .get_finished_metrics()
            .unwrap_or_default()
            .iter()
            .flat_map(|resource| resource.scope_metrics())
            .flat_map(|scope| scope.metrics())
            .map(|metric| metric.name().to_string())
            .collect()
    }

    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ExporterFactory for InMemoryFactory {
    fn span_exporter(
        &self,
        _config: &OtlpConfig,
        _tls: Option<&TlsMaterial>,
    ) -> Result<BoxedSpanExporter> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(match self.mode {
            Mode::Healthy => BoxedSpanExporter::new(self.spans.clone()),
            Mode::Failing => BoxedSpanExporter::new(FailingSpanExporter),
            Mode::Stalling(delay) => BoxedSpanExporter::new(StallingSpanExporter { delay }),
        })
    }

    fn metric_exporter(
        &self,
        _config: &OtlpConfig,
        _tls: Option<&TlsMaterial>,
    ) -> Result<BoxedMetricExporter> {
        Ok(match self.mode {
            Mode::Failing => BoxedMetricExporter::new(FailingMetricExporter),
            Mode::Healthy | Mode::Stalling(_) => BoxedMetricExporter::new(self.metrics.clone()),
        })
    }
}

/// Providers over `factory` with synchronous export.
pub(crate) fn providers(factory: &InMemoryFactory) -> crate::provider::ProviderSet {
    let mut config = OtlpConfig::default();
    config.batch.enabled = false;
    config.retry.enabled = false;
    let bundle = crate::exporter::ExporterBundle::new(&config, factory)
        .expect("in-memory exporters always build");
    crate::provider::ProviderSet::build(
        &config,
        opentelemetry_sdk::Resource::builder_empty().build(),
        opentelemetry_sdk::trace::Sampler::AlwaysOn,
        bundle,
    )
}
