//! Shared logging utilities for consistent tracing across fault operations

use chrono::{DateTime, Local};
use tracing::{error, info};

/// Environment variable holding a full `EnvFilter` directive
pub const LOG_ENV: &str = "ARSENAL_LOG";

/// Build the filter directive used when `ARSENAL_LOG` is not set
pub fn default_directive(base_level: &str) -> String {
    format!("injector={base_level},shared={base_level},arsenal={base_level}")
}

/// Initialize tracing subscriber for the CLI.
///
/// `ARSENAL_LOG` wins over `log_level`; both fall back to `info`.
pub fn init_tracing(log_level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let base_level = log_level.unwrap_or("info");
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_directive(base_level)));

    // try_init: tests and repeated CLI entry points may race on the global subscriber
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .try_init();
}

/// Get formatted timestamp for consistent logging
pub fn format_timestamp() -> String {
    let now: DateTime<Local> = Local::now();
    now.format("%H:%M:%S%.3f").to_string()
}

/// Macro for fault-aware info logging
#[macro_export]
macro_rules! fault_info {
    ($fault:expr, $($arg:tt)*) => {
        tracing::info!(
            fault = %$fault,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for fault-aware warning logging
#[macro_export]
macro_rules! fault_warn {
    ($fault:expr, $($arg:tt)*) => {
        tracing::warn!(
            fault = %$fault,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for fault-aware error logging
#[macro_export]
macro_rules! fault_error {
    ($fault:expr, $($arg:tt)*) => {
        tracing::error!(
            fault = %$fault,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Macro for fault-aware debug logging
#[macro_export]
macro_rules! fault_debug {
    ($fault:expr, $($arg:tt)*) => {
        tracing::debug!(
            fault = %$fault,
            timestamp = $crate::logging::format_timestamp(),
            $($arg)*
        );
    };
}

/// Contextual logging helper for startup messages
pub fn log_startup(operation: &str, details: &str) {
    info!(timestamp = format_timestamp(), "🚀 Starting {} {}", operation, details);
}

/// Contextual logging helper for error conditions
pub fn log_error(context: &str, error: &dyn std::fmt::Display) {
    error!(
        timestamp = format_timestamp(),
        error = %error,
        "❌ {} failed: {}",
        context,
        error
    );
}

/// Contextual logging helper for success conditions
pub fn log_success(message: &str) {
    info!(timestamp = format_timestamp(), "✅ {}", message);
}
