//! Layered configuration for the hot-reloadable observability runtime.
//!
//! A [`Config`] is a plain, immutable value describing service identity,
//! OTLP exporter settings, sampling, instrumentation toggles, logging and the
//! diagnostics endpoint. It is produced fresh on every load by a
//! [`ConfigSource`] and never mutated in place by the runtime.
//!
//! # Features
//!
//! - **Layered loading** - defaults, a YAML or TOML file, standard `OTEL_*`
//!   environment variables, `OBSERVE_*` environment variables and an explicit
//!   override, merged with [figment](https://docs.rs/figment)
//! - **Validation** - every load is validated, so a source yields either a
//!   usable value or a typed [`ConfigError`]
//! - **Digesting** - [`ConfigDigest`] gives a fixed-size content hash used to
//!   skip reloads that would not change anything
//!
//! # Example
//!
//! ```no_run
//! use observe_config::{ConfigLoader, ConfigSource};
//!
//! let source = ConfigLoader::new().with_file("observe.yaml").build();
//! let config = source.load()?;
//! println!("sampling with {}", config.sampling.mode);
//! # Ok::<(), observe_config::ConfigError>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod digest;
mod error;
mod loader;
mod validate;

pub use config::{
    BatchConfig, Compression, Config, ConfigBuilder, DiagnosticsConfig, ExportersConfig,
    GrpcInstrumentationConfig, HttpInstrumentationConfig, InstrumentationConfig, LogFormat,
    LoggingConfig, MessagingInstrumentationConfig, OtlpConfig, Protocol, RetryConfig,
    RuntimeMetricsConfig, SamplingConfig, SamplingMode, ServiceConfig, SqlInstrumentationConfig,
    TlsConfig,
};
pub use digest::ConfigDigest;
pub use error::{ConfigError, Result};
pub use loader::{
    ConfigLoader, ConfigSource, DEFAULT_CONFIG_PATH, ENV_PREFIX, FileConfigSource,
    StaticConfigSource,
};

pub use figment;
