//! Holder for the platform-wide ("core") database connection
//!
//! The core database holds cross-tenant entities such as accounts and the
//! organization directory. Its target is resolved once at startup from
//! [`TenantRef::Core`]; no caller-supplied identifier ever reaches this path.

use std::sync::Arc;

use crate::db::{ConnectionFactory, ConnectionTarget};
use crate::error::Result;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::tenant::TenantRef;

#[derive(Debug, Clone)]
pub struct CoreConnectionHolder {
    registry: Arc<ConnectionRegistry>,
    factory: ConnectionFactory,
    target: ConnectionTarget,
}

impl CoreConnectionHolder {
    /// Fails with `InvalidTarget` if the configured core database name is unusable
    pub fn new(registry: Arc<ConnectionRegistry>, factory: ConnectionFactory) -> Result<Self> {
        let target = factory.build(&TenantRef::Core)?;
        Ok(Self {
            registry,
            factory,
            target,
        })
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    /// The core connection, opened on first use
    pub async fn get(&self) -> Result<Arc<ConnectionHandle>> {
        let factory = self.factory.clone();
        let target = self.target.clone();
        self.registry
            .get_or_create(TenantRef::Core, move || async move {
                factory.open(&target).await
            })
            .await
    }
}
