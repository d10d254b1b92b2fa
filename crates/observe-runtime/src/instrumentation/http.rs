//! HTTP server instrumentation.

use super::server::{Flavor, ServerTelemetry, TraceLayer};
use crate::error::{Error, Result};
use crate::provider::ProviderSet;
use observe_config::HttpInstrumentationConfig;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::TracerProvider as _;
use std::collections::HashSet;
use std::sync::Arc;

const SCOPE: &str = "observe.http";

/// Produces server spans and request durations for HTTP services.
#[derive(Clone)]
pub struct HttpInstrumentation {
    telemetry: Arc<ServerTelemetry>,
}

impl HttpInstrumentation {
    pub(crate) fn new(config: &HttpInstrumentationConfig, providers: &ProviderSet) -> Result<Self> {
        let mut ignored_routes = HashSet::new();
        for route in &config.ignored_routes {
            if !route.starts_with('/') {
                return Err(Error::construction(
                    "http instrumentation",
                    format!("ignored route {route:?} must start with '/'"),
                ));
            }
            ignored_routes.insert(route.clone());
        }

        let duration = providers
            .meter_provider()
            .meter(SCOPE)
            .f64_histogram("http.server.request.duration")
            .with_unit("s")
            .with_description("Duration of inbound HTTP requests")
            .build();

        Ok(Self {
            telemetry: Arc::new(ServerTelemetry {
                tracer: providers.tracer_provider().tracer(SCOPE),
                duration,
                flavor: Flavor::Http { ignored_routes },
            }),
        })
    }

    /// Tower layer to wrap an HTTP service with.
    pub fn layer(&self) -> TraceLayer {
        TraceLayer::new(Arc::clone(&self.telemetry))
    }

    /// Whether requests for `path` bypass tracing.
    pub fn is_ignored(&self, path: &str) -> bool {
        match &self.telemetry.flavor {
            Flavor::Http { ignored_routes } => ignored_routes.contains(path),
            Flavor::Grpc { .. } => false,
        }
    }
}
