//! Error types for runtime construction, reload and shutdown.

use observe_config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// A specialised Result type for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error carried by construction failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while building, reloading or retiring a runtime.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// A required setting is missing or out of range.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// A component (exporter, provider, TLS material, instrumentation
    /// helper, diagnostics listener) could not be built.
    #[error("failed to construct {component}")]
    Construction {
        /// Name of the component that failed.
        component: &'static str,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// One or more owned resources failed to shut down.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    /// The client was used after [`Client::shutdown`](crate::Client::shutdown).
    #[error("runtime client has been shut down")]
    Closed,

    /// Tracing subscriber initialisation failed.
    #[error("failed to initialise logging")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}

impl Error {
    pub(crate) fn construction(
        component: &'static str,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Construction {
            component,
            source: source.into(),
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration(ConfigError::invalid(field, reason))
    }

    /// Returns true for [`Error::Configuration`].
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Returns true for [`Error::Construction`].
    pub fn is_construction(&self) -> bool {
        matches!(self, Error::Construction { .. })
    }
}

/// Failure of one or more shutdown steps.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// A single component reported an error.
    #[error("{component} shutdown failed: {message}")]
    Component {
        /// Name of the component.
        component: &'static str,
        /// Error reported by the component.
        message: String,
    },

    /// Shutdown did not finish within the drain bound.
    #[error("shutdown did not complete within {0:?}")]
    Timeout(Duration),

    /// Several components failed; every one was still attempted.
    #[error("{}", join_messages(.0))]
    Multiple(Vec<ShutdownError>),
}

impl ShutdownError {
    pub(crate) fn component(component: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Component {
            component,
            message: error.to_string(),
        }
    }

    /// Folds collected failures into one result.
    pub fn join(mut errors: Vec<ShutdownError>) -> std::result::Result<(), ShutdownError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ShutdownError::Multiple(errors)),
        }
    }

    /// Number of individual failures represented by this error.
    pub fn failure_count(&self) -> usize {
        match self {
            ShutdownError::Multiple(errors) => errors.iter().map(ShutdownError::failure_count).sum(),
            _ => 1,
        }
    }
}

fn join_messages(errors: &[ShutdownError]) -> String {
    let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("multiple shutdown errors: {}", messages.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_empty_is_ok() {
        assert!(ShutdownError::join(Vec::new()).is_ok());
    }

    #[test]
    fn test_join_single_is_unwrapped() {
        let err = ShutdownError::join(vec![ShutdownError::component("meter provider", "boom")])
            .unwrap_err();

        assert!(matches!(err, ShutdownError::Component { .. }));
        assert_eq!(err.to_string(), "meter provider shutdown failed: boom");
    }

    #[test]
    fn test_join_many_keeps_every_failure() {
        let err = ShutdownError::join(vec![
            ShutdownError::component("meter provider", "a"),
            ShutdownError::component("tracer provider", "b"),
            ShutdownError::Timeout(Duration::from_secs(1)),
        ])
        .unwrap_err();

        assert_eq!(err.failure_count(), 3);
        let message = err.to_string();
        assert!(message.contains("meter provider shutdown failed: a"));
        assert!(message.contains("tracer provider shutdown failed: b"));
        assert!(message.contains("1s"));
    }

    #[test]
    fn test_configuration_classification() {
        let err = Error::invalid("sampling.argument", "out of range");
        assert!(err.is_configuration());
        assert!(!err.is_construction());

        let err = Error::construction("span exporter", "dial failed");
        assert!(err.is_construction());
    }
}
