//! Error types for configuration loading.

use thiserror::Error;

/// A specialised Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors produced while loading or validating configuration.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or merged.
    #[error("failed to load configuration")]
    Load(#[source] Box<figment::Error>),

    /// A setting is missing or out of range.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// Dotted path of the offending setting.
        field: &'static str,
        /// Human readable description of the problem.
        reason: String,
    },

    /// The configuration could not be rendered for digesting.
    #[error("failed to serialise configuration")]
    Serialize(#[from] serde_json::Error),
}

impl ConfigError {
    /// Builds a [`ConfigError::Invalid`] for the given setting.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}
