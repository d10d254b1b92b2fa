//! Validation rules applied after every load.

use crate::config::{Config, SamplingConfig, SamplingMode};
use crate::error::{ConfigError, Result};

impl Config {
    /// Checks that all required settings are present and in range.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(ConfigError::invalid("service.name", "must not be empty"));
        }

        let otlp = &self.exporters.otlp;
        if otlp.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid(
                "exporters.otlp.endpoint",
                "must not be empty",
            ));
        }
        if otlp.tls.cert_file.is_some() != otlp.tls.key_file.is_some() {
            return Err(ConfigError::invalid(
                "exporters.otlp.tls",
                "cert_file and key_file must both be set",
            ));
        }

        let batch = &otlp.batch;
        if batch.enabled {
            if batch.max_queue_size == 0 || batch.max_export_batch_size == 0 {
                return Err(ConfigError::invalid(
                    "exporters.otlp.batch",
                    "queue and batch sizes must be positive",
                ));
            }
            if batch.max_export_batch_size > batch.max_queue_size {
                return Err(ConfigError::invalid(
                    "exporters.otlp.batch.max_export_batch_size",
                    format!(
                        "{} exceeds max_queue_size {}",
                        batch.max_export_batch_size, batch.max_queue_size
                    ),
                ));
            }
        }

        let retry = &otlp.retry;
        if retry.enabled {
            if retry.initial_interval.is_zero() {
                return Err(ConfigError::invalid(
                    "exporters.otlp.retry.initial_interval",
                    "must be positive",
                ));
            }
            if retry.max_interval < retry.initial_interval {
                return Err(ConfigError::invalid(
                    "exporters.otlp.retry.max_interval",
                    "must not be shorter than initial_interval",
                ));
            }
        }

        if self.sampling.mode == SamplingMode::TraceIdRatio {
            self.sampling.trace_id_ratio()?;
        }

        if self.diagnostics.enabled && self.diagnostics.http_addr.trim().is_empty() {
            return Err(ConfigError::invalid(
                "diagnostics.http_addr",
                "required when diagnostics are enabled",
            ));
        }

        Ok(())
    }
}

impl SamplingConfig {
    /// Returns the sampling argument as a trace ID ratio.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] unless the argument lies in `(0, 1]`.
    pub fn trace_id_ratio(&self) -> Result<f64> {
        let ratio = self.argument;
        if ratio > 0.0 && ratio <= 1.0 {
            return Ok(ratio);
        }

        Err(ConfigError::invalid(
            "sampling.argument",
            format!("trace_id_ratio requires a ratio in (0, 1], got {ratio}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn invalid_field(config: &Config) -> &'static str {
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected invalid configuration, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_empty_service_name_is_rejected() {
        let config = Config::builder().service_name("  ").build();
        assert_eq!(invalid_field(&config), "service.name");
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        let config = Config::builder().endpoint("").build();
        assert_eq!(invalid_field(&config), "exporters.otlp.endpoint");
    }

    #[test]
    fn test_ratio_bounds() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let config = Config::builder()
                .sampling(SamplingMode::TraceIdRatio, bad)
                .build();
            assert_eq!(invalid_field(&config), "sampling.argument", "ratio {bad}");
        }

        for good in [0.25, 1.0, f64::MIN_POSITIVE] {
            let config = Config::builder()
                .sampling(SamplingMode::TraceIdRatio, good)
                .build();
            assert!(config.validate().is_ok(), "ratio {good}");
        }
    }

    #[test]
    fn test_argument_ignored_for_other_modes() {
        let config = Config::builder()
            .sampling(SamplingMode::AlwaysOn, 0.0)
            .build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_client_certificate_is_rejected() {
        let mut config = Config::default();
        config.exporters.otlp.tls.cert_file = Some(PathBuf::from("/etc/otel/client.pem"));

        assert_eq!(invalid_field(&config), "exporters.otlp.tls");
    }

    #[test]
    fn test_batch_larger_than_queue_is_rejected() {
        let mut config = Config::default();
        config.exporters.otlp.batch.max_export_batch_size = 4096;

        assert_eq!(
            invalid_field(&config),
            "exporters.otlp.batch.max_export_batch_size"
        );
    }

    #[test]
    fn test_batch_sizes_ignored_when_batching_disabled() {
        let mut config = Config::builder().batching(false).build();
        config.exporters.otlp.batch.max_queue_size = 0;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_intervals_are_checked() {
        let mut config = Config::default();
        config.exporters.otlp.retry.initial_interval = Duration::ZERO;
        assert_eq!(
            invalid_field(&config),
            "exporters.otlp.retry.initial_interval"
        );

        let mut config = Config::default();
        config.exporters.otlp.retry.max_interval = Duration::from_millis(100);
        assert_eq!(invalid_field(&config), "exporters.otlp.retry.max_interval");

        let mut config = Config::builder().retry(false).build();
        config.exporters.otlp.retry.initial_interval = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_diagnostics_address_required_when_enabled() {
        let config = Config::builder().diagnostics_addr("").build();
        assert_eq!(invalid_field(&config), "diagnostics.http_addr");

        let config = Config::builder()
            .diagnostics(false)
            .diagnostics_addr("")
            .build();
        assert!(config.validate().is_ok());
    }
}
