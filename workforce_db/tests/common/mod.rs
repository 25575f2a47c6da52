//! Test utilities shared by the connection manager integration tests
//!
//! `FakeConnector` stands in for the database cluster: it hands out SeaORM
//! mock connections, counts opens per database and closes, and can be told
//! to fail, stall or close slowly.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use sea_orm::{DatabaseBackend, DatabaseConnection, DbErr, MockDatabase};
use workforce_db::{
    ConnectionFactory, ConnectionTarget, Connector, DatabaseConfig, DatabaseService, RetryPolicy,
};

#[derive(Debug, Default)]
pub struct FakeConnector {
    opens: AtomicUsize,
    opens_by_db: DashMap<String, usize>,
    closes: AtomicUsize,
    fail_remaining: AtomicUsize,
    ping_fails: AtomicBool,
    open_delay: Duration,
    close_delay: Duration,
}

#[allow(dead_code)]
impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every open sleeps this long first, widening the race window
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// The next `n` opens fail with a connection error
    pub fn failing_first(self, n: usize) -> Self {
        self.fail_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn set_ping_fails(&self, fails: bool) {
        self.ping_fails.store(fails, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn opens_for(&self, database: &str) -> usize {
        self.opens_by_db.get(database).map(|n| *n).unwrap_or(0)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, target: &ConnectionTarget) -> Result<DatabaseConnection, DbErr> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self
            .opens_by_db
            .entry(target.database_name().to_string())
            .or_insert(0) += 1;

        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        let should_fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DbErr::Custom(format!(
                "connection refused by {}",
                target.database_name()
            )));
        }

        Ok(MockDatabase::new(DatabaseBackend::MySql).into_connection())
    }

    async fn close(&self, _conn: &DatabaseConnection) -> Result<(), DbErr> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self, _conn: &DatabaseConnection) -> Result<(), DbErr> {
        if self.ping_fails.load(Ordering::SeqCst) {
            Err(DbErr::Custom("server has gone away".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Configuration with short timeouts and a fast retry policy
#[allow(dead_code)]
pub fn test_config() -> DatabaseConfig {
    DatabaseConfig {
        shutdown_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        },
        ..DatabaseConfig::default()
    }
}

/// A service wired to `connector` with nothing opened yet
#[allow(dead_code)]
pub fn test_service(connector: &Arc<FakeConnector>) -> DatabaseService {
    DatabaseService::new(test_config(), connector.clone()).expect("test config is valid")
}

#[allow(dead_code)]
pub fn test_factory(connector: &Arc<FakeConnector>) -> ConnectionFactory {
    ConnectionFactory::new(Arc::new(test_config()), connector.clone())
}

#[allow(dead_code)]
pub fn mock_client() -> DatabaseConnection {
    MockDatabase::new(DatabaseBackend::MySql).into_connection()
}

/// Console logging through the crate's own entry point; `RUST_LOG` overrides the level
#[allow(dead_code)]
pub fn init_test_logging() {
    workforce_db::set_and_init_console_logging("debug", "workforce_db");
}
