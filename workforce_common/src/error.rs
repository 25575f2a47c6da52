//! Common error types for the workforce backend

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkforceError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WorkforceError {
    /// Build a configuration error for an environment variable holding a bad value
    pub fn invalid_setting(key: &str, value: &str, reason: impl std::fmt::Display) -> Self {
        WorkforceError::ConfigError(format!("{key}={value:?}: {reason}"))
    }
}
