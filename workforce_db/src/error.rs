//! Connection manager error types

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the connection manager.
///
/// `Clone` so that every waiter of one in-flight connection attempt can
/// receive the identical outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Caller error: the tenant id cannot name a database. Never retried.
    #[error("Invalid connection target: {0}")]
    InvalidTarget(String),

    /// Network, auth or timeout failure while opening a client. Retryable.
    #[error("Failed to connect to database `{database}`: {reason}")]
    ConnectFailure { database: String, reason: String },

    /// Some connections did not close within the shutdown budget.
    #[error("{pending} connection(s) did not close within {timeout:?}")]
    ShutdownTimeout { pending: usize, timeout: Duration },
}

impl ConnectionError {
    pub fn invalid_target(reason: impl Into<String>) -> Self {
        ConnectionError::InvalidTarget(reason.into())
    }

    pub fn connect_failure(database: impl Into<String>, reason: impl ToString) -> Self {
        ConnectionError::ConnectFailure {
            database: database.into(),
            reason: reason.to_string(),
        }
    }

    /// Only transient connect failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ConnectionError::ConnectFailure { .. })
    }
}

pub type Result<T, E = ConnectionError> = std::result::Result<T, E>;
