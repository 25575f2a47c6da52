//! Database module for workforce_db
//!
//! Turns tenant references into connection targets and opens SeaORM clients
//! for them. Nothing here caches; see [`crate::registry`] for that.

pub mod connection;
pub mod target;

pub use connection::{ConnectionFactory, Connector, SeaOrmConnector};
pub use target::ConnectionTarget;
