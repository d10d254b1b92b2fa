//! Database client spans.

use crate::provider::ProviderSet;
use observe_config::SqlInstrumentationConfig;
use opentelemetry::trace::{Span as _, SpanKind, Status, Tracer, TracerProvider as _};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_sdk::trace::{SdkTracer, Span};
use opentelemetry_semantic_conventions::attribute::{
    DB_OPERATION_NAME, DB_QUERY_TEXT, DB_SYSTEM_NAME,
};

const SCOPE: &str = "observe.sql";

/// Starts client spans around database calls.
///
/// Statement text is only recorded when `collect_queries` is set, since
/// statements routinely carry user data.
#[derive(Clone)]
pub struct SqlInstrumentation {
    tracer: SdkTracer,
    collect_queries: bool,
}

impl SqlInstrumentation {
    pub(crate) fn new(config: &SqlInstrumentationConfig, providers: &ProviderSet) -> Self {
        Self {
            tracer: providers.tracer_provider().tracer(SCOPE),
            collect_queries: config.collect_queries,
        }
    }

    /// Whether statement text is attached to spans.
    pub fn collects_queries(&self) -> bool {
        self.collect_queries
    }

    /// Starts a client span for one statement, parented on the current context.
    ///
    /// `system` is the database system name such as `postgresql`, and
    /// `operation` the statement verb such as `SELECT`.
    pub fn start_query(&self, system: &str, operation: &str, statement: &str) -> Span {
        let mut attributes = vec![
            KeyValue::new(DB_SYSTEM_NAME, system.to_string()),
            KeyValue::new(DB_OPERATION_NAME, operation.to_string()),
        ];
        if self.collect_queries {
            attributes.push(KeyValue::new(DB_QUERY_TEXT, statement.to_string()));
        }

        self.tracer
            .span_builder(format!("{operation} {system}"))
            .with_kind(SpanKind::Client)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, &OtelContext::current())
    }

    /// Ends a query span, marking it failed when `result` is an error.
    pub fn end_query<T, E: std::fmt::Display>(&self, mut span: Span, result: &Result<T, E>) {
        if let Err(e) = result {
            span.set_status(Status::error(e.to_string()));
        }
        span.end();
    }
}
