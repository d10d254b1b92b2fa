//! Tracer and meter providers wired over an [`ExporterBundle`].

use crate::error::ShutdownError;
use crate::exporter::ExporterBundle;
use crate::retry::RetryGate;
use observe_config::OtlpConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, Sampler, SdkTracerProvider,
};
use std::sync::Arc;

/// The SDK providers of one runtime instance.
#[derive(Debug, Clone)]
pub struct ProviderSet {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    retry: Arc<RetryGate>,
}

impl ProviderSet {
    /// Builds both providers, moving the bundle's exporters into them.
    ///
    /// With batching enabled spans go through a batch processor sized from
    /// the config; otherwise each span is exported synchronously as it ends.
    pub fn build(
        config: &OtlpConfig,
        resource: Resource,
        sampler: Sampler,
        bundle: ExporterBundle,
    ) -> Self {
        let ExporterBundle {
            span_exporter,
            metric_exporter,
            retry,
            ..
        } = bundle;

        let mut tracer_builder = SdkTracerProvider::builder()
            .with_sampler(sampler)
            .with_resource(resource.clone());

        tracer_builder = if config.batch.enabled {
            let batch_config = BatchConfigBuilder::default()
                .with_max_queue_size(config.batch.max_queue_size)
                .with_max_export_batch_size(config.batch.max_export_batch_size)
                .with_scheduled_delay(config.batch.scheduled_delay)
                .build();

            let span_processor = BatchSpanProcessor::builder(span_exporter)
                .with_batch_config(batch_config)
                .build();

            tracer_builder.with_span_processor(span_processor)
        } else {
            tracer_builder.with_simple_exporter(span_exporter)
        };

        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(config.metrics_interval)
            .build();

        let meter_provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();

        Self {
            tracer_provider: tracer_builder.build(),
            meter_provider,
            retry,
        }
    }

    /// The tracer provider.
    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    /// The meter provider.
    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    /// Exports everything buffered so far. Failures are logged.
    pub fn flush(&self) {
        if let Err(e) = self.tracer_provider.force_flush() {
            tracing::warn!(target: "observe_lifecycle", error = %e, "Failed to flush tracer provider");
        }

        if let Err(e) = self.meter_provider.force_flush() {
            tracing::warn!(target: "observe_lifecycle", error = %e, "Failed to flush meter provider");
        }
    }

    /// Cancels pending export retries, then shuts down the meter side
    /// (reader, then exporter) and the trace side (processor, then exporter).
    ///
    /// Both are always attempted. The final exports get a single attempt
    /// each.
    ///
    /// # Errors
    ///
    /// Returns every failure joined into one [`ShutdownError`].
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        self.retry.drain();
        let mut errors = Vec::new();

        if let Err(e) = self.meter_provider.shutdown() {
            errors.push(ShutdownError::component("meter provider", e));
        }

        if let Err(e) = self.tracer_provider.shutdown() {
            errors.push(ShutdownError::component("tracer provider", e));
        }

        ShutdownError::join(errors)
    }
}
