//! Self-metrics describing the runtime itself.
//!
//! Instruments are observable and registered on the meter of the instance
//! they describe, so every reload re-registers them on the fresh provider.

use crate::stats::ExporterStats;
use observe_config::InstrumentationConfig;
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Meter, ObservableCounter, ObservableGauge};
use std::sync::Arc;

/// Instrumentation scope of the self-metrics.
pub const SCOPE: &str = "observe.runtime";

/// Handles keeping the self-metric callbacks registered.
pub(crate) struct RuntimeMetrics {
    _reloads: ObservableCounter<u64>,
    _enabled: ObservableGauge<u64>,
    _queue_limit: ObservableGauge<u64>,
    _dropped: ObservableCounter<u64>,
}

impl RuntimeMetrics {
    /// Registers the instruments on `meter`.
    ///
    /// `generation` is the number of successful reloads that preceded the
    /// instance owning `meter`.
    pub(crate) fn register(
        meter: &Meter,
        generation: u64,
        instrumentation: &InstrumentationConfig,
        trace_stats: Arc<ExporterStats>,
        metric_stats: Arc<ExporterStats>,
    ) -> Self {
        let reloads = meter
            .u64_observable_counter("observe.runtime.config.reloads")
            .with_description("Successful configuration reloads")
            .with_callback(move |observer| observer.observe(generation, &[]))
            .build();

        let flags = [
            ("http", instrumentation.http.enabled),
            ("grpc", instrumentation.grpc.enabled),
            ("sql", instrumentation.sql.enabled),
            ("messaging", instrumentation.messaging.enabled),
            ("runtime_metrics", instrumentation.runtime_metrics.enabled),
        ];
        let enabled = meter
            .u64_observable_gauge("observe.runtime.instrumentation.enabled")
            .with_description("1 when the instrumentation module is enabled")
            .with_callback(move |observer| {
                for (module, on) in flags {
                    observer.observe(u64::from(on), &[KeyValue::new("module", module)]);
                }
            })
            .build();

        let limits = [Arc::clone(&trace_stats), metric_stats];
        let queue_limit = meter
            .u64_observable_gauge("observe.runtime.trace.queue.limit")
            .with_description("Configured export queue limit")
            .with_callback(move |observer| {
                for stats in &limits {
                    observer.observe(
                        stats.queue_limit() as u64,
                        &[KeyValue::new("signal", stats.signal().as_str())],
                    );
                }
            })
            .build();

        let dropped = meter
            .u64_observable_counter("observe.runtime.trace.dropped_spans")
            .with_description("Spans lost to failed exports")
            .with_callback(move |observer| observer.observe(trace_stats.dropped(), &[]))
            .build();

        Self {
            _reloads: reloads,
            _enabled: enabled,
            _queue_limit: queue_limit,
            _dropped: dropped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Signal;
    use crate::test_support::{InMemoryFactory, providers};
    use observe_config::Protocol;
    use opentelemetry::metrics::MeterProvider as _;

    #[test]
    fn test_instruments_are_exported_on_flush() {
        let factory = InMemoryFactory::default();
        let providers = providers(&factory);
        let trace_stats = Arc::new(ExporterStats::new(
            Signal::Traces,
            Protocol::Grpc,
            "localhost:4317",
            512,
        ));
        let metric_stats = Arc::new(ExporterStats::new(
            Signal::Metrics,
            Protocol::Grpc,
            "localhost:4317",
            0,
        ));
        trace_stats.record_failure(3, "unavailable");

        let _metrics = RuntimeMetrics::register(
            &providers.meter_provider().meter(SCOPE),
            2,
            &InstrumentationConfig::default(),
            trace_stats,
            metric_stats,
        );
        providers.flush();

        let names = factory.metric_names();
        for expected in [
            "observe.runtime.config.reloads",
            "observe.runtime.instrumentation.enabled",
            "observe.runtime.trace.queue.limit",
            "observe.runtime.trace.dropped_spans",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }
}
