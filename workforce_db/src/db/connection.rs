//! Database connection management

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{ConnectOptions, Database as SeaOrmDatabase, DatabaseConnection, DbErr};

use crate::config::DatabaseConfig;
use crate::db::target::ConnectionTarget;
use crate::error::{ConnectionError, Result};
use crate::tenant::TenantRef;

/// Network side of the connection factory.
///
/// The production implementation is [`SeaOrmConnector`]; tests substitute
/// their own to count opens and inject failures.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a ready-to-use client for `target`
    async fn open(&self, target: &ConnectionTarget) -> Result<DatabaseConnection, DbErr>;

    /// Release the client's pool
    async fn close(&self, conn: &DatabaseConnection) -> Result<(), DbErr> {
        match conn {
            DatabaseConnection::SqlxMySqlPoolConnection(_) => {
                conn.get_mysql_connection_pool().close().await;
                Ok(())
            }
            // Nothing pooled behind the other variants
            _ => Ok(()),
        }
    }

    /// Round-trip to the server
    async fn ping(&self, conn: &DatabaseConnection) -> Result<(), DbErr> {
        conn.ping().await
    }
}

/// Connector backed by a SeaORM connection pool
#[derive(Debug, Default, Clone, Copy)]
pub struct SeaOrmConnector;

#[async_trait]
impl Connector for SeaOrmConnector {
    async fn open(&self, target: &ConnectionTarget) -> Result<DatabaseConnection, DbErr> {
        let pool = target.pool_options();

        let mut options = ConnectOptions::new(target.connection_url().to_string());
        options
            .max_connections(pool.max_connections)
            .min_connections(pool.min_connections)
            .connect_timeout(pool.connect_timeout)
            .acquire_timeout(pool.acquire_timeout)
            .idle_timeout(pool.idle_timeout)
            .sqlx_logging(false);

        SeaOrmDatabase::connect(options).await
    }
}

/// Builds connection targets and opens clients for them. Caches nothing.
#[derive(Clone)]
pub struct ConnectionFactory {
    config: Arc<DatabaseConfig>,
    connector: Arc<dyn Connector>,
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("core_database", &self.config.core_database)
            .field("tenant_template", &self.config.tenant_database_template)
            .finish_non_exhaustive()
    }
}

impl ConnectionFactory {
    pub fn new(config: Arc<DatabaseConfig>, connector: Arc<dyn Connector>) -> Self {
        Self { config, connector }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Resolve the target for a tenant. Pure; fails only with `InvalidTarget`.
    pub fn build(&self, tenant: &TenantRef) -> Result<ConnectionTarget> {
        ConnectionTarget::resolve(&self.config, tenant)
    }

    /// Open a client for `target`, bounded by the pool's connect timeout
    pub async fn open(&self, target: &ConnectionTarget) -> Result<DatabaseConnection> {
        crate::info!(
            "[DB] Connecting to database {} for {}",
            target,
            target.tenant()
        );

        let timeout = target.pool_options().connect_timeout;
        // On timeout the open future is dropped here, taking any half-built pool with it
        let conn = match tokio::time::timeout(timeout, self.connector.open(target)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                crate::error!(
                    "[DB] Failed to connect to database {}: {}",
                    target.database_name(),
                    e
                );
                return Err(ConnectionError::connect_failure(target.database_name(), e));
            }
            Err(_) => {
                crate::error!(
                    "[DB] Connecting to database {} timed out after {:?}",
                    target.database_name(),
                    timeout
                );
                return Err(ConnectionError::connect_failure(
                    target.database_name(),
                    format!("connect timed out after {timeout:?}"),
                ));
            }
        };

        crate::info!(
            "[DB] Successfully connected to database {}",
            target.database_name()
        );
        Ok(conn)
    }

    pub async fn close(&self, conn: &DatabaseConnection) -> Result<(), DbErr> {
        self.connector.close(conn).await
    }

    pub async fn ping(&self, conn: &DatabaseConnection) -> Result<(), DbErr> {
        self.connector.ping(conn).await
    }
}
