//! Connection lifecycle: retry policy and orderly shutdown
//!
//! The coordinator never retries on its own. It only answers whether a
//! failed attempt is worth repeating and how long to wait first; callers
//! that want retries drive the loop themselves.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ConnectionError;
use crate::registry::{CloseOutcome, ConnectionRegistry};
use crate::tenant::TenantRef;

/// Exponential backoff for retryable connect failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Whether to try again after `attempt` attempts (1-based) ended in `error`
    pub fn should_retry(&self, attempt: u32, error: &ConnectionError) -> bool {
        error.is_retryable() && attempt < self.max_attempts
    }

    /// Delay before the attempt following `attempt`: `base * 2^(attempt-1)`, capped
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Result of draining the registry at shutdown
#[derive(Debug, Default, Clone)]
pub struct ShutdownReport {
    pub closed: Vec<TenantRef>,
    pub failed: Vec<TenantRef>,
    /// Entries whose open had failed or that were already closed
    pub skipped: Vec<TenantRef>,
    /// Set when the shutdown budget ran out before every close finished
    pub timed_out: Option<ConnectionError>,
}

impl ShutdownReport {
    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_none()
    }
}

/// Drives shutdown of every cached connection and owns the retry policy
#[derive(Debug, Clone)]
pub struct LifecycleCoordinator {
    registry: Arc<ConnectionRegistry>,
    shutdown_timeout: Duration,
    retry: RetryPolicy,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        shutdown_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            shutdown_timeout,
            retry,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn should_retry(&self, attempt: u32, error: &ConnectionError) -> bool {
        self.retry.should_retry(attempt, error)
    }

    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        self.retry.backoff_duration(attempt)
    }

    /// Close every cached connection, waiting at most the shutdown timeout.
    ///
    /// Never fails: individual close errors and an exhausted budget are
    /// logged and reported. Calling it again finds an empty registry and
    /// closes nothing.
    pub async fn on_shutdown_signal(&self) -> ShutdownReport {
        let mut closing = self.registry.evict_all();
        let mut report = ShutdownReport::default();

        if closing.is_empty() {
            crate::debug!("[LIFECYCLE] Shutdown requested, no connections to close");
            return report;
        }

        crate::info!(
            "[LIFECYCLE] Shutting down {} connection(s) (timeout {:?})",
            closing.len(),
            self.shutdown_timeout
        );

        let deadline = Instant::now() + self.shutdown_timeout;
        loop {
            match tokio::time::timeout_at(deadline, closing.join_next()).await {
                Ok(Some(Ok((tenant, outcome)))) => match outcome {
                    CloseOutcome::Closed => report.closed.push(tenant),
                    CloseOutcome::CloseFailed => report.failed.push(tenant),
                    CloseOutcome::NotOpen => report.skipped.push(tenant),
                },
                Ok(Some(Err(join_err))) => {
                    crate::error!("[LIFECYCLE] Close task failed: {}", join_err);
                }
                Ok(None) => break,
                Err(_) => {
                    let err = ConnectionError::ShutdownTimeout {
                        pending: closing.len(),
                        timeout: self.shutdown_timeout,
                    };
                    crate::error!("[LIFECYCLE] {}; proceeding with shutdown", err);
                    // Only the waiting stops; each release keeps running in its own task
                    closing.abort_all();
                    report.timed_out = Some(err);
                    break;
                }
            }
        }

        crate::info!(
            "[LIFECYCLE] Shutdown finished: {} closed, {} failed, {} skipped",
            report.closed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report
    }

    /// Wait for Ctrl-C (or SIGTERM on unix), then shut down
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReport {
        wait_for_signal().await;
        crate::info!("[LIFECYCLE] Termination signal received");
        self.on_shutdown_signal().await
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            crate::warn!("[LIFECYCLE] Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        }
    }

    #[test]
    fn test_should_retry_connect_failures_within_budget() {
        let policy = policy();
        let err = ConnectionError::connect_failure("workforce_org_acme", "refused");
        assert!(policy.should_retry(1, &err));
        assert!(policy.should_retry(3, &err));
        assert!(!policy.should_retry(4, &err));
    }

    #[test]
    fn test_never_retry_invalid_target() {
        let err = ConnectionError::invalid_target("reserved");
        assert!(!policy().should_retry(1, &err));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff_duration(0), Duration::ZERO);
        assert_eq!(policy.backoff_duration(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_duration(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_duration(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_duration(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_duration(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_report_is_clean() {
        let mut report = ShutdownReport::default();
        assert!(report.is_clean());
        report.failed.push(TenantRef::Core);
        assert!(!report.is_clean());
    }
}
