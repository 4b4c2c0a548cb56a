//! Logging setup and the crate's `log_*` macros.
//!
//! All macros forward to `tracing`; the subscriber is installed once per
//! process by [`init_logger`] or [`init_logger_with_level`].

use std::sync::Once;
use tracing_subscriber::EnvFilter;

pub use tracing::{debug, error, info, warn};

const DEFAULT_FILTER: &str = "vmtool=info";
const VERBOSE_FILTER: &str = "vmtool=debug";

static INIT: Once = Once::new();

/// Install the fmt subscriber, honouring `RUST_LOG` when set.
pub fn init_logger() {
    install(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)));
}

/// Install the fmt subscriber with a fixed level; `RUST_LOG` still wins when set.
pub fn init_logger_with_level(verbose: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    install(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)));
}

fn install(filter: EnvFilter) {
    INIT.call_once(|| {
        // Another subscriber may already be registered (tests, embedding apps).
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::logger::debug!($($arg)*) };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::logger::info!($($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::logger::warn!($($arg)*) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::logger::error!($($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_logger();
        init_logger_with_level(true);
        crate::log_info!("logger initialised twice");
    }
}
