//! workforce_common
//!
//! Common utilities shared by the workforce analytics backend crates.
//! This crate provides logging setup, logging macros and error handling.

mod error;
mod logging;

pub use error::*;
pub use logging::*;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
