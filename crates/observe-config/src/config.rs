//! Configuration types and their defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// OTLP transport protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// gRPC via tonic (port 4317).
    #[default]
    Grpc,
    /// HTTP with protobuf bodies (port 4318).
    Http,
}

impl Protocol {
    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Grpc => "grpc",
            Protocol::Http => "http",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compression applied to OTLP payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression.
    #[default]
    Gzip,
}

/// Head sampling strategy for traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Record every trace.
    AlwaysOn,
    /// Drop every trace.
    AlwaysOff,
    /// Follow the parent decision, sample roots.
    #[default]
    #[serde(alias = "parentbased_always_on")]
    ParentBasedAlwaysOn,
    /// Follow the parent decision, drop roots.
    #[serde(alias = "parentbased_always_off")]
    ParentBasedAlwaysOff,
    /// Sample a fixed fraction of trace IDs given by the sampling argument.
    #[serde(alias = "traceidratio")]
    TraceIdRatio,
}

impl SamplingMode {
    /// Returns the configuration spelling of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMode::AlwaysOn => "always_on",
            SamplingMode::AlwaysOff => "always_off",
            SamplingMode::ParentBasedAlwaysOn => "parent_based_always_on",
            SamplingMode::ParentBasedAlwaysOff => "parent_based_always_off",
            SamplingMode::TraceIdRatio => "trace_id_ratio",
        }
    }
}

impl fmt::Display for SamplingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for the process log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human readable text.
    Text,
}

/// Root configuration value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service identity reported on every resource.
    pub service: ServiceConfig,
    /// Exporter settings.
    pub exporters: ExportersConfig,
    /// Trace sampling.
    pub sampling: SamplingConfig,
    /// Per-module instrumentation toggles.
    pub instrumentation: InstrumentationConfig,
    /// Process log settings.
    pub logging: LoggingConfig,
    /// Diagnostics HTTP endpoint.
    pub diagnostics: DiagnosticsConfig,
}

impl Config {
    /// Creates a new config builder starting from defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Service identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// `service.name`.
    pub name: String,
    /// `service.namespace`.
    pub namespace: String,
    /// `service.version`.
    pub version: String,
    /// `deployment.environment.name`.
    pub environment: String,
    /// Extra resource attributes. These win over detected attributes.
    pub attributes: BTreeMap<String, String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "observe-service".to_string(),
            namespace: "default".to_string(),
            version: "0.0.1".to_string(),
            environment: "development".to_string(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Exporter settings, one section per exporter family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportersConfig {
    /// OTLP exporter used for traces and metrics.
    pub otlp: OtlpConfig,
}

/// OTLP exporter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtlpConfig {
    /// Transport protocol.
    pub protocol: Protocol,
    /// Collector endpoint. A missing scheme is filled in from `insecure`.
    pub endpoint: String,
    /// Use plaintext transport when the endpoint carries no scheme.
    pub insecure: bool,
    /// Extra request headers (gRPC metadata for `grpc`).
    pub headers: BTreeMap<String, String>,
    /// Export request timeout in milliseconds.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Payload compression.
    pub compression: Compression,
    /// Span batching.
    pub batch: BatchConfig,
    /// Backoff for failed exports.
    pub retry: RetryConfig,
    /// Client TLS material.
    pub tls: TlsConfig,
    /// Metric collection interval in milliseconds.
    #[serde(with = "duration_ms")]
    pub metrics_interval: Duration,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Grpc,
            endpoint: "localhost:4317".to_string(),
            insecure: true,
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(10),
            compression: Compression::Gzip,
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            tls: TlsConfig::default(),
            metrics_interval: Duration::from_secs(60),
        }
    }
}

/// Span batching settings. Disabling batching makes export synchronous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Whether spans go through a batch processor.
    pub enabled: bool,
    /// Maximum spans per export call.
    pub max_export_batch_size: usize,
    /// Delay between scheduled exports in milliseconds.
    #[serde(with = "duration_ms")]
    pub scheduled_delay: Duration,
    /// Maximum spans buffered before new spans are dropped.
    pub max_queue_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
            max_queue_size: 2048,
        }
    }
}

/// Exponential backoff applied to failed export calls.
///
/// Intervals double from `initial_interval` up to `max_interval`. A batch
/// is given up once the next wait would pass `max_elapsed_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Whether failed exports are retried at all.
    pub enabled: bool,
    /// First wait in milliseconds.
    #[serde(with = "duration_ms")]
    pub initial_interval: Duration,
    /// Longest single wait in milliseconds.
    #[serde(with = "duration_ms")]
    pub max_interval: Duration,
    /// Total time spent on one batch in milliseconds.
    #[serde(with = "duration_ms")]
    pub max_elapsed_time: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Duration::from_secs(32 * 60),
        }
    }
}

/// Client TLS material, all paths to PEM files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// CA bundle used to verify the collector.
    pub ca_file: Option<PathBuf>,
    /// Client certificate. Requires `key_file`.
    pub cert_file: Option<PathBuf>,
    /// Client private key. Requires `cert_file`.
    pub key_file: Option<PathBuf>,
}

impl TlsConfig {
    /// Returns true when no TLS material is configured at all.
    pub fn is_empty(&self) -> bool {
        self.ca_file.is_none() && self.cert_file.is_none() && self.key_file.is_none()
    }
}

/// Trace sampling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Sampling strategy.
    pub mode: SamplingMode,
    /// Ratio for [`SamplingMode::TraceIdRatio`], in `(0, 1]`.
    pub argument: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            mode: SamplingMode::ParentBasedAlwaysOn,
            argument: 1.0,
        }
    }
}

/// Per-module instrumentation toggles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Inbound HTTP server spans.
    pub http: HttpInstrumentationConfig,
    /// Inbound gRPC server spans.
    pub grpc: GrpcInstrumentationConfig,
    /// Database client spans.
    pub sql: SqlInstrumentationConfig,
    /// Message producer and consumer spans.
    pub messaging: MessagingInstrumentationConfig,
    /// Runtime self-metrics.
    pub runtime_metrics: RuntimeMetricsConfig,
}

/// HTTP server instrumentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpInstrumentationConfig {
    /// Whether the helper is built.
    pub enabled: bool,
    /// Request paths that are never traced.
    pub ignored_routes: Vec<String>,
}

impl Default for HttpInstrumentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignored_routes: Vec::new(),
        }
    }
}

/// gRPC server instrumentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrpcInstrumentationConfig {
    /// Whether the helper is built.
    pub enabled: bool,
    /// Request metadata keys copied onto spans.
    pub metadata_allowlist: Vec<String>,
}

impl Default for GrpcInstrumentationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metadata_allowlist: Vec::new(),
        }
    }
}

/// Database client instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlInstrumentationConfig {
    /// Whether the helper is built.
    pub enabled: bool,
    /// Record statement text on spans.
    pub collect_queries: bool,
}

/// Messaging instrumentation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingInstrumentationConfig {
    /// Whether the helper is built.
    pub enabled: bool,
}

/// Runtime self-metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeMetricsConfig {
    /// Whether the instruments are registered.
    pub enabled: bool,
}

impl Default for RuntimeMetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Process log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `observe_runtime=debug,info`.
    pub level: String,
    /// Output format. Only read at startup.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Diagnostics HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Whether the listener is started.
    pub enabled: bool,
    /// Bind address.
    pub http_addr: String,
    /// Bearer token required by the endpoint. Empty disables the check.
    pub auth_token: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            http_addr: "127.0.0.1:14271".to_string(),
            auth_token: String::new(),
        }
    }
}

/// Builder for constructing configuration programmatically.
#[must_use = "builders do nothing unless .build() is called"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Creates a new config builder with default values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Sets the service name.
    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service.name = name.into();
        self
    }

    /// Sets the service version.
    pub fn service_version(mut self, version: impl Into<String>) -> Self {
        self.config.service.version = version.into();
        self
    }

    /// Sets the deployment environment.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.config.service.environment = environment.into();
        self
    }

    /// Adds a resource attribute.
    pub fn resource_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .service
            .attributes
            .insert(key.into(), value.into());
        self
    }

    /// Sets the OTLP endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.exporters.otlp.endpoint = endpoint.into();
        self
    }

    /// Sets the OTLP protocol.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.config.exporters.otlp.protocol = protocol;
        self
    }

    /// Enables or disables span batching.
    pub fn batching(mut self, enabled: bool) -> Self {
        self.config.exporters.otlp.batch.enabled = enabled;
        self
    }

    /// Enables or disables export retries.
    pub fn retry(mut self, enabled: bool) -> Self {
        self.config.exporters.otlp.retry.enabled = enabled;
        self
    }

    /// Sets the span queue size.
    pub fn max_queue_size(mut self, size: usize) -> Self {
        self.config.exporters.otlp.batch.max_queue_size = size;
        self
    }

    /// Sets the sampling mode and argument.
    pub fn sampling(mut self, mode: SamplingMode, argument: f64) -> Self {
        self.config.sampling = SamplingConfig { mode, argument };
        self
    }

    /// Enables or disables the diagnostics listener.
    pub fn diagnostics(mut self, enabled: bool) -> Self {
        self.config.diagnostics.enabled = enabled;
        self
    }

    /// Sets the diagnostics bind address.
    pub fn diagnostics_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.diagnostics.http_addr = addr.into();
        self
    }

    /// Sets the diagnostics bearer token.
    pub fn diagnostics_token(mut self, token: impl Into<String>) -> Self {
        self.config.diagnostics.auth_token = token.into();
        self
    }

    /// Replaces the instrumentation toggles.
    pub fn instrumentation(mut self, instrumentation: InstrumentationConfig) -> Self {
        self.config.instrumentation = instrumentation;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.service.name, "observe-service");
        assert_eq!(config.service.namespace, "default");
        assert_eq!(config.service.environment, "development");

        let otlp = &config.exporters.otlp;
        assert_eq!(otlp.protocol, Protocol::Grpc);
        assert_eq!(otlp.endpoint, "localhost:4317");
        assert_eq!(otlp.timeout, Duration::from_secs(10));
        assert_eq!(otlp.compression, Compression::Gzip);
        assert!(otlp.batch.enabled);
        assert_eq!(otlp.batch.max_export_batch_size, 512);
        assert_eq!(otlp.batch.max_queue_size, 2048);
        assert!(otlp.tls.is_empty());
        assert!(otlp.retry.enabled);
        assert_eq!(otlp.retry.initial_interval, Duration::from_millis(500));
        assert_eq!(otlp.retry.max_interval, Duration::from_secs(5));
        assert_eq!(otlp.retry.max_elapsed_time, Duration::from_secs(32 * 60));

        assert_eq!(config.sampling.mode, SamplingMode::ParentBasedAlwaysOn);
        assert_eq!(config.sampling.argument, 1.0);

        assert!(config.instrumentation.http.enabled);
        assert!(config.instrumentation.grpc.enabled);
        assert!(!config.instrumentation.sql.enabled);
        assert!(!config.instrumentation.messaging.enabled);
        assert!(config.instrumentation.runtime_metrics.enabled);

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Json);

        assert!(config.diagnostics.enabled);
        assert_eq!(config.diagnostics.http_addr, "127.0.0.1:14271");
        assert!(config.diagnostics.auth_token.is_empty());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .service_name("checkout")
            .service_version("2.1.0")
            .environment("production")
            .resource_attribute("team", "payments")
            .endpoint("https://collector:4318")
            .protocol(Protocol::Http)
            .batching(false)
            .sampling(SamplingMode::TraceIdRatio, 0.25)
            .diagnostics(false)
            .build();

        assert_eq!(config.service.name, "checkout");
        assert_eq!(config.service.version, "2.1.0");
        assert_eq!(config.service.environment, "production");
        assert_eq!(
            config.service.attributes.get("team").map(String::as_str),
            Some("payments")
        );
        assert_eq!(config.exporters.otlp.endpoint, "https://collector:4318");
        assert_eq!(config.exporters.otlp.protocol, Protocol::Http);
        assert!(!config.exporters.otlp.batch.enabled);
        assert_eq!(config.sampling.mode, SamplingMode::TraceIdRatio);
        assert_eq!(config.sampling.argument, 0.25);
        assert!(!config.diagnostics.enabled);
    }

    #[test]
    fn test_sampling_mode_serialization() {
        assert_eq!(
            serde_json::to_string(&SamplingMode::ParentBasedAlwaysOn).unwrap(),
            "\"parent_based_always_on\""
        );
        assert_eq!(
            serde_json::to_string(&SamplingMode::TraceIdRatio).unwrap(),
            "\"trace_id_ratio\""
        );
    }

    #[test]
    fn test_sampling_mode_accepts_aliases() {
        let mode: SamplingMode = serde_json::from_str("\"parentbased_always_off\"").unwrap();
        assert_eq!(mode, SamplingMode::ParentBasedAlwaysOff);

        let mode: SamplingMode = serde_json::from_str("\"traceidratio\"").unwrap();
        assert_eq!(mode, SamplingMode::TraceIdRatio);
    }

    #[test]
    fn test_unknown_sampling_mode_is_rejected() {
        assert!(serde_json::from_str::<SamplingMode>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_sampling_mode_display_matches_serde() {
        for mode in [
            SamplingMode::AlwaysOn,
            SamplingMode::AlwaysOff,
            SamplingMode::ParentBasedAlwaysOn,
            SamplingMode::ParentBasedAlwaysOff,
            SamplingMode::TraceIdRatio,
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{mode}\""));
        }
    }

    #[test]
    fn test_protocol_serialization() {
        assert_eq!(serde_json::to_string(&Protocol::Grpc).unwrap(), "\"grpc\"");
        assert_eq!(serde_json::to_string(&Protocol::Http).unwrap(), "\"http\"");
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(BatchConfig::default()).unwrap();
        assert_eq!(json["scheduled_delay"], 5000);

        let json = serde_json::to_value(RetryConfig::default()).unwrap();
        assert_eq!(json["initial_interval"], 500);
        assert_eq!(json["max_elapsed_time"], 1_920_000);
    }

    #[test]
    fn test_partial_retry_section_keeps_defaults() {
        let retry: RetryConfig = serde_json::from_str(r#"{"enabled": false}"#).unwrap();

        assert!(!retry.enabled);
        assert_eq!(retry.max_interval, Duration::from_secs(5));
    }
}
