//! Producer and consumer spans for message brokers.

use crate::provider::ProviderSet;
use observe_config::MessagingInstrumentationConfig;
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Span as _, SpanKind, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{SdkTracer, Span};
use opentelemetry_semantic_conventions::attribute::{
    MESSAGING_DESTINATION_NAME, MESSAGING_OPERATION_TYPE, MESSAGING_SYSTEM,
};
use std::collections::HashMap;

const SCOPE: &str = "observe.messaging";

/// Starts spans around message publication and processing and carries
/// trace context through message headers.
#[derive(Clone)]
pub struct MessagingInstrumentation {
    tracer: SdkTracer,
    propagator: TraceContextPropagator,
}

impl MessagingInstrumentation {
    pub(crate) fn new(_config: &MessagingInstrumentationConfig, providers: &ProviderSet) -> Self {
        Self {
            tracer: providers.tracer_provider().tracer(SCOPE),
            propagator: TraceContextPropagator::new(),
        }
    }

    /// Starts a producer span and writes its context into `headers`.
    pub fn start_publish(
        &self,
        system: &str,
        destination: &str,
        headers: &mut HashMap<String, String>,
    ) -> Span {
        let current = OtelContext::current();
        let span = self.start(system, destination, "send", SpanKind::Producer, &current);
        let cx = current.with_remote_span_context(span.span_context().clone());
        self.propagator.inject_context(&cx, headers);
        span
    }

    /// Starts a consumer span parented on the context found in `headers`.
    pub fn start_process(
        &self,
        system: &str,
        destination: &str,
        headers: &HashMap<String, String>,
    ) -> Span {
        let parent = self.propagator.extract(headers);
        self.start(system, destination, "process", SpanKind::Consumer, &parent)
    }

    fn start(
        &self,
        system: &str,
        destination: &str,
        operation: &'static str,
        kind: SpanKind,
        parent: &OtelContext,
    ) -> Span {
        self.tracer
            .span_builder(format!("{operation} {destination}"))
            .with_kind(kind)
            .with_attributes([
                KeyValue::new(MESSAGING_SYSTEM, system.to_string()),
                KeyValue::new(MESSAGING_DESTINATION_NAME, destination.to_string()),
                KeyValue::new(MESSAGING_OPERATION_TYPE, operation),
            ])
            .start_with_context(&self.tracer, parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{InMemoryFactory, providers};

    #[test]
    fn test_consumer_continues_producer_trace() {
        let factory = InMemoryFactory::default();
        let messaging = MessagingInstrumentation::new(
            &MessagingInstrumentationConfig { enabled: true },
            &providers(&factory),
        );

        let mut headers = HashMap::new();
        let mut publish = messaging.start_publish("kafka", "orders", &mut headers);
        assert!(headers.contains_key("traceparent"));
        publish.end();

        let mut process = messaging.start_process("kafka", "orders", &headers);
        process.end();

        let spans = factory.spans();
        assert_eq!(spans.len(), 2);
        let producer = spans.iter().find(|s| s.span_kind == SpanKind::Producer).unwrap();
        let consumer = spans.iter().find(|s| s.span_kind == SpanKind::Consumer).unwrap();
        assert_eq!(producer.name, "send orders");
        assert_eq!(consumer.name, "process orders");
        assert_eq!(
            consumer.span_context.trace_id(),
            producer.span_context.trace_id()
        );
        assert_eq!(consumer.parent_span_id, producer.span_context.span_id());
    }

    #[test]
    fn test_process_without_headers_starts_new_trace() {
        let factory = InMemoryFactory::default();
        let messaging = MessagingInstrumentation::new(
            &MessagingInstrumentationConfig { enabled: true },
            &providers(&factory),
        );

        let mut span = messaging.start_process("nats", "jobs", &HashMap::new());
        span.end();

        let spans = factory.spans();
        assert_eq!(spans[0].parent_span_id, opentelemetry::trace::SpanId::INVALID);
    }
}
