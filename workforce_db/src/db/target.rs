//! Connection targets
//!
//! A [`ConnectionTarget`] is derived from a [`TenantRef`] and the configuration
//! alone, so resolving the same tenant twice always produces the same target.

use std::fmt;

use url::Url;

use crate::config::{DatabaseConfig, PoolOptions, TENANT_PLACEHOLDER};
use crate::error::{ConnectionError, Result};
use crate::tenant::TenantRef;

/// Longest logical database name most engines accept
pub const MAX_DATABASE_NAME_LEN: usize = 64;

/// Resolved parameters needed to open one tenant's database
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    tenant: TenantRef,
    database_name: String,
    cluster_endpoint: Url,
    pool_options: PoolOptions,
}

impl ConnectionTarget {
    /// Resolve the target for `tenant` by substituting into the configured template
    pub fn resolve(config: &DatabaseConfig, tenant: &TenantRef) -> Result<Self> {
        let database_name = match tenant {
            TenantRef::Core => config.core_database.clone(),
            TenantRef::Tenant(id) => {
                let name = config
                    .tenant_database_template
                    .replacen(TENANT_PLACEHOLDER, id.as_str(), 1);
                if name == config.core_database {
                    return Err(ConnectionError::invalid_target(format!(
                        "tenant `{id}` resolves to the core database name"
                    )));
                }
                name
            }
        };

        validate_database_name(&database_name)?;

        let mut cluster_endpoint = config.cluster_url.clone();
        cluster_endpoint.set_path(&format!("/{database_name}"));

        Ok(Self {
            tenant: tenant.clone(),
            database_name,
            cluster_endpoint,
            pool_options: config.pool.clone(),
        })
    }

    pub fn tenant(&self) -> &TenantRef {
        &self.tenant
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Full driver URL, credentials included. Never log this.
    pub fn connection_url(&self) -> &Url {
        &self.cluster_endpoint
    }

    pub fn pool_options(&self) -> &PoolOptions {
        &self.pool_options
    }

    /// Endpoint with the password masked, safe for logs and errors
    pub fn redacted_endpoint(&self) -> String {
        let mut url = self.cluster_endpoint.clone();
        if url.password().is_some() {
            // Only fails for cannot-be-a-base URLs, which config validation rejects
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("tenant", &self.tenant)
            .field("database_name", &self.database_name)
            .field("cluster_endpoint", &self.redacted_endpoint())
            .field("pool_options", &self.pool_options)
            .finish()
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.database_name, self.redacted_endpoint())
    }
}

fn validate_database_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ConnectionError::invalid_target("database name is empty"));
    }
    if name.len() > MAX_DATABASE_NAME_LEN {
        return Err(ConnectionError::invalid_target(format!(
            "database name `{name}` exceeds {MAX_DATABASE_NAME_LEN} bytes"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ConnectionError::invalid_target(format!(
            "database name `{name}` contains forbidden characters"
        )));
    }
    Ok(())
}
