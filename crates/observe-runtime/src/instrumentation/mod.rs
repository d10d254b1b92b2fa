//! Per-module instrumentation helpers.
//!
//! Each helper holds handles into one instance's providers. Adapter code
//! should fetch helpers from the current instance at the point of use
//! rather than caching them across reloads.

mod grpc;
mod http;
mod messaging;
mod server;
mod sql;

pub use grpc::GrpcInstrumentation;
pub use http::HttpInstrumentation;
pub use messaging::MessagingInstrumentation;
pub use server::{ResponseFuture, TraceLayer, TraceService};
pub use sql::SqlInstrumentation;

use crate::error::Result;
use crate::provider::ProviderSet;
use observe_config::InstrumentationConfig;

/// The helpers enabled for one runtime instance.
#[derive(Clone, Default)]
pub(crate) struct Instrumentation {
    pub(crate) http: Option<HttpInstrumentation>,
    pub(crate) grpc: Option<GrpcInstrumentation>,
    pub(crate) sql: Option<SqlInstrumentation>,
    pub(crate) messaging: Option<MessagingInstrumentation>,
}

impl Instrumentation {
    /// Builds every enabled helper. The first failure aborts the build.
    pub(crate) fn build(config: &InstrumentationConfig, providers: &ProviderSet) -> Result<Self> {
        let http = config
            .http
            .enabled
            .then(|| HttpInstrumentation::new(&config.http, providers))
            .transpose()?;
        let grpc = config
            .grpc
            .enabled
            .then(|| GrpcInstrumentation::new(&config.grpc, providers))
            .transpose()?;
        let sql = config
            .sql
            .enabled
            .then(|| SqlInstrumentation::new(&config.sql, providers));
        let messaging = config
            .messaging
            .enabled
            .then(|| MessagingInstrumentation::new(&config.messaging, providers));

        Ok(Self {
            http,
            grpc,
            sql,
            messaging,
        })
    }
}
