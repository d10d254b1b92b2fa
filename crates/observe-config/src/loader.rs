//! Layered configuration sources.
//!
//! [`ConfigLoader`] merges, in order of increasing priority:
//! 1. Compiled-in defaults
//! 2. A YAML or TOML file (optional, skipped when missing)
//! 3. Standard OpenTelemetry environment variables (`OTEL_*`)
//! 4. `OBSERVE_`-prefixed environment variables, nested with `__`
//! 5. Explicit overrides supplied by the caller
//!
//! # Supported Standard Environment Variables
//!
//! | Variable | Config Path |
//! |----------|-------------|
//! | `OTEL_SERVICE_NAME` | `service.name` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `exporters.otlp.endpoint` |
//! | `OTEL_EXPORTER_OTLP_PROTOCOL` | `exporters.otlp.protocol` |
//! | `OTEL_EXPORTER_OTLP_HEADERS` | `exporters.otlp.headers` |
//! | `OTEL_EXPORTER_OTLP_COMPRESSION` | `exporters.otlp.compression` |
//! | `OTEL_TRACES_SAMPLER` | `sampling.mode` |
//! | `OTEL_TRACES_SAMPLER_ARG` | `sampling.argument` |
//!
//! List-valued settings (`instrumentation.http.ignored_routes`,
//! `instrumentation.grpc.metadata_allowlist`) take a comma-separated value
//! when set through `OBSERVE_` variables.

use crate::config::{Compression, Config, Protocol, SamplingMode};
use crate::error::Result;
use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File read by [`ConfigLoader::with_default_file`].
pub const DEFAULT_CONFIG_PATH: &str = "observe.yaml";

/// Prefix for runtime-specific environment variables.
pub const ENV_PREFIX: &str = "OBSERVE_";

const ENV_NESTING: &str = "__";

const LIST_ENV_KEYS: [(&str, &str); 2] = [
    (
        "INSTRUMENTATION__HTTP__IGNORED_ROUTES",
        "instrumentation.http.ignored_routes",
    ),
    (
        "INSTRUMENTATION__GRPC__METADATA_ALLOWLIST",
        "instrumentation.grpc.metadata_allowlist",
    ),
];

/// Produces configuration values.
///
/// Implementations must return either a complete, validated [`Config`] or an
/// error; partial values are never handed to the runtime.
pub trait ConfigSource: Send + Sync {
    /// Loads a fresh configuration value.
    ///
    /// # Errors
    ///
    /// Returns an error if any layer fails to parse or the merged value is
    /// invalid.
    fn load(&self) -> Result<Config>;

    /// File whose changes should trigger a reload, if any.
    fn watch_path(&self) -> Option<&Path> {
        None
    }
}

/// Builder for a layered [`FileConfigSource`].
#[must_use = "builders do nothing unless .build() is called"]
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    standard_env: bool,
    prefixed_env: bool,
    overrides: Figment,
}

impl ConfigLoader {
    /// Creates a loader that reads both environment layers and no file.
    pub fn new() -> Self {
        Self {
            file: None,
            standard_env: true,
            prefixed_env: true,
            overrides: Figment::new(),
        }
    }

    /// Layers a YAML or TOML file, chosen by extension (`.toml` is TOML,
    /// anything else YAML). A missing file is skipped at load time.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Layers [`DEFAULT_CONFIG_PATH`] from the working directory.
    pub fn with_default_file(self) -> Self {
        self.with_file(DEFAULT_CONFIG_PATH)
    }

    /// Enables or disables the standard `OTEL_*` layer.
    pub fn with_standard_env(mut self, enabled: bool) -> Self {
        self.standard_env = enabled;
        self
    }

    /// Enables or disables the `OBSERVE_*` layer.
    pub fn with_prefixed_env(mut self, enabled: bool) -> Self {
        self.prefixed_env = enabled;
        self
    }

    /// Merges a provider above every other layer.
    pub fn with_override(mut self, provider: impl Provider) -> Self {
        self.overrides = self.overrides.merge(provider);
        self
    }

    /// Finishes the loader.
    pub fn build(self) -> FileConfigSource {
        FileConfigSource { loader: self }
    }

    /// Assembles the merged figment without extracting it.
    pub fn figment(&self) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(path) = &self.file {
            if path.exists() {
                figment = match path.extension().and_then(|ext| ext.to_str()) {
                    Some("toml") => figment.merge(Toml::file(path)),
                    _ => figment.merge(Yaml::file(path)),
                };
            } else {
                tracing::debug!(path = %path.display(), "Config file not found, skipping");
            }
        }

        if self.standard_env {
            figment = figment.merge(standard_otel_env());
        }

        if self.prefixed_env {
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .filter(|key| {
                        !LIST_ENV_KEYS
                            .iter()
                            .any(|(env_key, _)| key.as_str().eq_ignore_ascii_case(env_key))
                    })
                    .split(ENV_NESTING),
            );
            for (env_key, path) in LIST_ENV_KEYS {
                if let Ok(raw) = std::env::var(format!("{ENV_PREFIX}{env_key}")) {
                    figment = figment.merge(Serialized::default(path, split_list(&raw)));
                }
            }
        }

        figment.merge(self.overrides.clone())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`ConfigSource`] backed by layered files and environment variables.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    loader: ConfigLoader,
}

impl FileConfigSource {
    /// Path of the layered file, if one was configured.
    pub fn path(&self) -> Option<&Path> {
        self.loader.file.as_deref()
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<Config> {
        let config: Config = self.loader.figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    fn watch_path(&self) -> Option<&Path> {
        self.path()
    }
}

/// A [`ConfigSource`] returning a fixed value.
#[derive(Debug, Clone)]
pub struct StaticConfigSource {
    config: Config,
}

impl StaticConfigSource {
    /// Wraps a configuration value.
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config.clone())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Serialize)]
struct PartialService {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct PartialOtlp {
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<Protocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression: Option<Compression>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Default, Serialize)]
struct PartialExporters {
    otlp: PartialOtlp,
}

#[derive(Debug, Default, Serialize)]
struct PartialSampling {
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<SamplingMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    argument: Option<f64>,
}

/// Partial config for standard OTEL env var overrides.
#[derive(Debug, Default, Serialize)]
struct PartialConfig {
    service: PartialService,
    exporters: PartialExporters,
    sampling: PartialSampling,
}

fn standard_otel_env() -> Serialized<PartialConfig> {
    let mut config = PartialConfig::default();

    if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
        config.service.name = Some(name);
    }

    let otlp = &mut config.exporters.otlp;
    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        otlp.endpoint = Some(endpoint);
    }

    if let Ok(protocol) = std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL") {
        otlp.protocol = match protocol.to_lowercase().as_str() {
            "grpc" => Some(Protocol::Grpc),
            "http/protobuf" | "http" => Some(Protocol::Http),
            _ => None,
        };
    }

    if let Ok(compression) = std::env::var("OTEL_EXPORTER_OTLP_COMPRESSION") {
        otlp.compression = match compression.to_lowercase().as_str() {
            "gzip" => Some(Compression::Gzip),
            "none" => Some(Compression::None),
            _ => None,
        };
    }

    if let Ok(headers) = std::env::var("OTEL_EXPORTER_OTLP_HEADERS") {
        for pair in headers.split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                otlp.headers
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    if let Ok(sampler) = std::env::var("OTEL_TRACES_SAMPLER") {
        config.sampling.mode = match sampler.to_lowercase().as_str() {
            "always_on" => Some(SamplingMode::AlwaysOn),
            "always_off" => Some(SamplingMode::AlwaysOff),
            "parentbased_always_on" => Some(SamplingMode::ParentBasedAlwaysOn),
            "parentbased_always_off" => Some(SamplingMode::ParentBasedAlwaysOff),
            "traceidratio" | "parentbased_traceidratio" => Some(SamplingMode::TraceIdRatio),
            _ => None,
        };
    }

    if let Ok(argument) = std::env::var("OTEL_TRACES_SAMPLER_ARG") {
        config.sampling.argument = argument.trim().parse().ok();
    }

    Serialized::defaults(config)
}
