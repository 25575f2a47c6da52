//! workforce_db
//!
//! Multi-tenant database connection manager for the workforce analytics
//! backend. Decides which logical database each operation talks to, opens
//! and caches one connection per organization, and guarantees that
//! concurrent requests for the same organization share one connection
//! attempt instead of racing to open duplicates.

pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod registry;
pub mod service;
pub mod tenant;

pub use config::{DatabaseConfig, PoolOptions};
pub use db::{ConnectionFactory, ConnectionTarget, Connector, SeaOrmConnector};
pub use error::ConnectionError;
pub use lifecycle::{LifecycleCoordinator, RetryPolicy, ShutdownReport};
pub use registry::{
    CloseOutcome, ConnectionHandle, ConnectionRegistry, ConnectionStatus, CoreConnectionHolder,
    HandleState,
};
pub use service::{DatabaseService, HealthStatus};
pub use tenant::{TenantId, TenantRef, CORE_IDENTIFIER};

// Re-export common utilities
pub use workforce_common::*;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
