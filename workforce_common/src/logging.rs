//! Logging module for the workforce backend crates
//!
//! Provides one-shot logging initialization (console or file + console) and a
//! panic recovery hook, shared by every crate in the workspace.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, Once};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::WorkforceError;

/// Configuration for logging setup
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub module_name: String,
}

impl LoggingConfig {
    pub fn new(level: &str, module_name: &str) -> Self {
        Self {
            log_level: level.to_string(),
            module_name: module_name.to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::new("info", "workforce_db")
    }
}

// Static variables for ensuring single initialization
static CONSOLE_INIT: Once = Once::new();
static FILE_INIT: Once = Once::new();
static PANIC_HOOK_INIT: Once = Once::new();

// Guards for non-blocking writers, kept alive for the process lifetime
static FILE_GUARD: once_cell::sync::Lazy<Mutex<Option<WorkerGuard>>> =
    once_cell::sync::Lazy::new(|| Mutex::new(None));
static CONSOLE_GUARD: once_cell::sync::Lazy<Mutex<Option<WorkerGuard>>> =
    once_cell::sync::Lazy::new(|| Mutex::new(None));

// Last panic message storage
static LAST_PANIC: once_cell::sync::Lazy<Mutex<Option<String>>> =
    once_cell::sync::Lazy::new(|| Mutex::new(None));

/// Initialize console logging with environment variable support
pub fn init_console_logging(config: &LoggingConfig) {
    CONSOLE_INIT.call_once(|| {
        let env_filter = create_env_filter(config);

        let result = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init();

        match result {
            Ok(()) => {
                debug!(
                    "Console logging initialized for {} (level: {})",
                    config.module_name, config.log_level
                );
                info!(
                    "[LOGGING] Console logging initialized for module: {}",
                    config.module_name
                );
            }
            // Another subscriber (e.g. a test harness) got there first
            Err(e) => eprintln!("[WORKFORCE_COMMON] Console logging not initialized: {}", e),
        }

        init_panic_recovery();
    });
}

/// Initialize file logging with both file and console output
pub fn init_file_logging(config: &LoggingConfig, log_path: &str) -> Result<(), WorkforceError> {
    let mut init_result = Ok(());

    FILE_INIT.call_once(|| {
        init_result = install_file_subscriber(config, log_path);
        init_panic_recovery();
    });

    init_result
}

fn install_file_subscriber(config: &LoggingConfig, log_path: &str) -> Result<(), WorkforceError> {
    let path = Path::new(log_path);
    let log_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| {
            WorkforceError::InvalidParameter(format!(
                "Invalid log path {log_path:?}: no parent directory"
            ))
        })?;
    let log_filename = path.file_name().ok_or_else(|| {
        WorkforceError::InvalidParameter(format!("Invalid log path {log_path:?}: no filename"))
    })?;

    fs::create_dir_all(log_dir)?;

    use tracing_appender::non_blocking;

    let env_filter = create_env_filter(config);

    // No rotation; the deployment's log shipper owns rotation
    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);
    let (file_writer, file_guard) = non_blocking(file_appender);
    let (console_writer, console_guard) = non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false),
        )
        .with(
            fmt::layer()
                .with_writer(console_writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true),
        )
        .try_init()
        .map_err(|e| WorkforceError::Internal(format!("Failed to install subscriber: {e}")))?;

    if let Ok(mut guard) = FILE_GUARD.lock() {
        *guard = Some(file_guard);
    }
    if let Ok(mut guard) = CONSOLE_GUARD.lock() {
        *guard = Some(console_guard);
    }

    debug!(
        "File logging initialized for {} in directory: {}",
        config.module_name,
        log_dir.display()
    );
    info!(
        "[LOGGING] File logging initialized for module: {} (level: {})",
        config.module_name, config.log_level
    );

    Ok(())
}

/// Create environment filter for logging
fn create_env_filter(config: &LoggingConfig) -> EnvFilter {
    let submodules = [
        "config",
        "db",
        "registry",
        "lifecycle",
        "service",
        "tenant",
    ];

    let level = if config.log_level.parse::<tracing::Level>().is_ok() {
        config.log_level.as_str()
    } else {
        "info"
    };

    let mut directives = vec![format!("{}={}", config.module_name, level)];
    for submodule in &submodules {
        directives.push(format!("{}::{}={}", config.module_name, submodule, level));
    }

    // RUST_LOG wins over our defaults when present
    EnvFilter::try_from_default_env()
        .map(|mut filter| {
            for directive in &directives {
                if let Ok(d) = directive.parse() {
                    filter = filter.add_directive(d);
                }
            }
            filter
        })
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")))
}

/// Set configuration and initialize console logging
pub fn set_and_init_console_logging(level: &str, module_name: &str) {
    let config = LoggingConfig::new(level, module_name);
    init_console_logging(&config);
}

/// Set configuration and initialize file logging
pub fn set_and_init_file_logging(
    level: &str,
    module_name: &str,
    log_path: &str,
) -> Result<(), WorkforceError> {
    let config = LoggingConfig::new(level, module_name);
    init_file_logging(&config, log_path)
}

/// Initialize panic recovery hook
pub fn init_panic_recovery() {
    PANIC_HOOK_INIT.call_once(|| {
        std::panic::set_hook(Box::new(|panic_info| {
            let panic_msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            let location = if let Some(location) = panic_info.location() {
                format!(
                    " at {}:{}:{}",
                    location.file(),
                    location.line(),
                    location.column()
                )
            } else {
                " at unknown location".to_string()
            };

            let full_msg = format!("{}{}", panic_msg, location);
            if let Ok(mut last) = LAST_PANIC.lock() {
                *last = Some(full_msg.clone());
            }

            tracing::error!("PANIC RECOVERED: {}", panic_msg);
            eprintln!("[WORKFORCE PANIC] {}", full_msg);
        }));

        info!("[LOGGING] Panic recovery hook initialized");
    });
}

/// Get the last panic message
pub fn get_last_panic() -> Option<String> {
    LAST_PANIC.lock().ok().and_then(|last| last.clone())
}

/// Clear the stored panic message
pub fn clear_last_panic() {
    if let Ok(mut last) = LAST_PANIC.lock() {
        *last = None;
    }
}

// Logging macros
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_logging_init() {
        set_and_init_console_logging("debug", "test_module");
        // Should not panic on second call
        set_and_init_console_logging("info", "test_module");
    }

    #[test]
    fn test_env_filter_falls_back_on_bad_level() {
        let config = LoggingConfig::new("loud", "workforce_db");
        let filter = create_env_filter(&config);
        assert!(filter.to_string().contains("workforce_db=info"));
    }

    #[test]
    fn test_file_logging_rejects_bare_filename() {
        let config = LoggingConfig::default();
        let err = install_file_subscriber(&config, "workforce.log").unwrap_err();
        assert!(matches!(err, WorkforceError::InvalidParameter(_)));
    }

    #[test]
    fn test_file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("nested").join("workforce.log");
        // The global subscriber may already be taken by another test; the
        // directory must exist regardless of that outcome.
        let _ = set_and_init_file_logging("debug", "workforce_db", log_path.to_str().unwrap());
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn test_panic_recovery() {
        init_panic_recovery();
        clear_last_panic();

        let result = std::panic::catch_unwind(|| {
            panic!("test panic");
        });

        assert!(result.is_err());
        let panic_msg = get_last_panic();
        assert!(panic_msg.is_some());
        assert!(panic_msg.unwrap().contains("test panic"));
    }
}
