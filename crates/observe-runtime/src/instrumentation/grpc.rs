//! gRPC server instrumentation.

use super::server::{Flavor, ServerTelemetry, TraceLayer};
use crate::error::{Error, Result};
use crate::provider::ProviderSet;
use http::HeaderName;
use observe_config::GrpcInstrumentationConfig;
use opentelemetry::metrics::MeterProvider as _;
use opentelemetry::trace::TracerProvider as _;
use std::sync::Arc;

const SCOPE: &str = "observe.grpc";

/// Produces server spans and call durations for gRPC services.
///
/// Request metadata is only copied onto spans for keys in the configured
/// allowlist. Keys are matched case-insensitively.
#[derive(Clone)]
pub struct GrpcInstrumentation {
    telemetry: Arc<ServerTelemetry>,
}

impl GrpcInstrumentation {
    pub(crate) fn new(config: &GrpcInstrumentationConfig, providers: &ProviderSet) -> Result<Self> {
        let metadata_allowlist = config
            .metadata_allowlist
            .iter()
            .map(|key| {
                HeaderName::from_bytes(key.trim().to_ascii_lowercase().as_bytes()).map_err(|e| {
                    Error::construction(
                        "grpc instrumentation",
                        format!("invalid metadata key {key:?}: {e}"),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let duration = providers
            .meter_provider()
            .meter(SCOPE)
            .f64_histogram("rpc.server.duration")
            .with_unit("s")
            .with_description("Duration of inbound gRPC calls")
            .build();

        Ok(Self {
            telemetry: Arc::new(ServerTelemetry {
                tracer: providers.tracer_provider().tracer(SCOPE),
                duration,
                flavor: Flavor::Grpc { metadata_allowlist },
            }),
        })
    }

    /// Tower layer to wrap a gRPC service with.
    pub fn layer(&self) -> TraceLayer {
        TraceLayer::new(Arc::clone(&self.telemetry))
    }
}
