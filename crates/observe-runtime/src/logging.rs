//! Process log bootstrap.

use crate::error::{Error, Result};
use observe_config::{LogFormat, LoggingConfig};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

/// Handle for updating the log filter after a reload.
#[derive(Debug, Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    format: LogFormat,
    env_override: bool,
}

/// Installs the global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from
/// `config.level`. Output is JSON or human-readable text per
/// `config.format`.
///
/// # Errors
///
/// Returns an error for an unparsable level or when a global subscriber
/// is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<LogHandle> {
    let (filter, env_override) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (filter_for(config)?, false),
    };
    let (filter, handle) = reload::Layer::new(filter);

    let json = config.format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json().with_target(true)))
        .with((!json).then(|| fmt::layer().with_target(true)))
        .try_init()?;

    Ok(LogHandle {
        filter: handle,
        format: config.format,
        env_override,
    })
}

impl LogHandle {
    /// Applies the level of a reloaded configuration.
    ///
    /// Does nothing when `RUST_LOG` chose the filter. The output format is
    /// fixed at startup.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable level or when the subscriber is
    /// gone.
    pub fn apply(&self, config: &LoggingConfig) -> Result<()> {
        if self.env_override {
            return Ok(());
        }

        if config.format != self.format {
            tracing::warn!(
                current = ?self.format,
                requested = ?config.format,
                "Log format changes take effect on restart"
            );
        }

        let filter = filter_for(config)?;
        self.filter
            .reload(filter)
            .map_err(|e| Error::construction("log filter", e))
    }
}

fn filter_for(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(config.level.trim())
        .map_err(|e| Error::invalid("logging.level", e.to_string()))
}
