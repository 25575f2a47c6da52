//! DatabaseService: the entry point data-access layers use to reach a database
//!
//! Request handlers resolve the tenant from the authenticated session and ask
//! for that tenant's connection here; cross-tenant data goes through the core
//! connection. Everything else in the crate sits behind this facade.

use std::sync::Arc;

use serde::Serialize;

use crate::config::DatabaseConfig;
use crate::db::{ConnectionFactory, Connector, SeaOrmConnector};
use crate::error::{ConnectionError, Result};
use crate::lifecycle::{LifecycleCoordinator, ShutdownReport};
use crate::registry::{
    CloseOutcome, ConnectionHandle, ConnectionRegistry, ConnectionStatus, CoreConnectionHolder,
};
use crate::tenant::{TenantId, TenantRef};

/// Result of pinging one open connection
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub tenant: TenantRef,
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseService {
    factory: ConnectionFactory,
    registry: Arc<ConnectionRegistry>,
    core: CoreConnectionHolder,
    lifecycle: LifecycleCoordinator,
}

impl DatabaseService {
    /// Start the service against a real cluster and open the core connection
    pub async fn connect(config: DatabaseConfig) -> Result<Self> {
        Self::connect_with(config, Arc::new(SeaOrmConnector)).await
    }

    /// Start the service with a custom connector and open the core connection
    pub async fn connect_with(
        config: DatabaseConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        crate::info!("[SERVICE] Initializing DatabaseService");
        let service = Self::new(config, connector)?;
        service.get_core_connection().await?;
        crate::info!("[SERVICE] DatabaseService initialized successfully");
        Ok(service)
    }

    /// Wire the components without opening anything
    pub fn new(config: DatabaseConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ConnectionError::invalid_target(e.to_string()))?;

        let shutdown_timeout = config.shutdown_timeout;
        let retry = config.retry;
        let factory = ConnectionFactory::new(Arc::new(config), connector);
        let registry = Arc::new(ConnectionRegistry::new(factory.clone()));
        let core = CoreConnectionHolder::new(registry.clone(), factory.clone())?;
        let lifecycle = LifecycleCoordinator::new(registry.clone(), shutdown_timeout, retry);

        Ok(Self {
            factory,
            registry,
            core,
            lifecycle,
        })
    }

    /// Connection to one organization's database.
    ///
    /// Fails with `InvalidTarget` for an empty, malformed or reserved id and
    /// with `ConnectFailure` if the database cannot be reached. Repeated calls
    /// for an open tenant are cache hits.
    pub async fn get_organization_connection(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<ConnectionHandle>> {
        let tenant = TenantId::parse(tenant_id)?;
        let key = TenantRef::Tenant(tenant);
        let target = self.factory.build(&key)?;

        let factory = self.factory.clone();
        self.registry
            .get_or_create(key, move || async move { factory.open(&target).await })
            .await
    }

    /// Like [`Self::get_organization_connection`], retrying connect failures
    /// with the configured backoff
    pub async fn get_organization_connection_with_retry(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<ConnectionHandle>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.get_organization_connection(tenant_id).await {
                Ok(handle) => return Ok(handle),
                Err(err) if self.lifecycle.should_retry(attempt, &err) => {
                    let delay = self.lifecycle.backoff_duration(attempt);
                    crate::warn!(
                        "[SERVICE] Attempt {} for tenant {} failed, retrying in {:?}: {}",
                        attempt,
                        tenant_id,
                        delay,
                        err
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Connection to the platform-wide database
    pub async fn get_core_connection(&self) -> Result<Arc<ConnectionHandle>> {
        self.core.get().await
    }

    /// Close every cached connection. Safe to call more than once.
    pub async fn close_all(&self) -> ShutdownReport {
        self.lifecycle.on_shutdown_signal().await
    }

    /// Administrative eviction of one organization's connection.
    ///
    /// Returns `Ok(false)` if the tenant had no cached connection. The next
    /// request for the tenant opens a fresh one.
    pub async fn evict_organization(&self, tenant_id: &str) -> Result<bool> {
        let tenant = TenantId::parse(tenant_id)?;
        Ok(matches!(
            self.registry.evict(&tenant).await,
            Some(CloseOutcome::Closed | CloseOutcome::CloseFailed)
        ))
    }

    /// Ping every open connection, bounded by the connect timeout each
    pub async fn health_check(&self) -> Vec<HealthStatus> {
        let timeout = self.factory.config().pool.connect_timeout;
        let mut results = Vec::new();

        for status in self.registry.snapshot() {
            let Some(handle) = self.registry.get(&status.tenant) else {
                continue;
            };
            let Some(client) = handle.client() else {
                continue;
            };

            let error = match tokio::time::timeout(timeout, self.factory.ping(client)).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some(format!("ping timed out after {timeout:?}")),
            };
            if let Some(e) = &error {
                crate::warn!("[SERVICE] Health check failed for {}: {}", status.tenant, e);
            }

            results.push(HealthStatus {
                tenant: status.tenant,
                healthy: error.is_none(),
                error,
            });
        }

        results
    }

    /// Snapshot of every cached connection
    pub fn connection_status(&self) -> Vec<ConnectionStatus> {
        self.registry.snapshot()
    }

    pub fn lifecycle(&self) -> &LifecycleCoordinator {
        &self.lifecycle
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }
}
