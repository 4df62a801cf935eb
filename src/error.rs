//! Shared error types that don't belong to a single service.

use thiserror::Error;

/// Errors raised while resolving configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    Invalid { var: String, message: String },
}

impl ConfigError {
    pub fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            var: var.to_string(),
            message: message.into(),
        }
    }
}
