//! Tracing setup for the command-line tool.
//!
//! The filter defaults to the configured `log_level` and is overridden
//! entirely by `RUST_LOG` when that is set.

use crate::config::LabConfig;
use tracing_subscriber::EnvFilter;

/// Build the event filter for `log_level`, honoring `RUST_LOG` first.
pub fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(log_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(log_level))
        .with_target(false)
        .try_init();
}

/// Install the global subscriber from the loaded configuration.
pub fn init_from_config(config: &LabConfig) {
    init(&config.application.log_level);
}
