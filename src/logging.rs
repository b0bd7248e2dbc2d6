//! Tracing subscriber setup
//!
//! The library only emits `tracing` events; applications decide where they go. This helper
//! installs a compact console subscriber for the demo and for quick experiments.
//!
//! ```text
//! RUST_LOG=rust_orm_system=debug cargo run --example sports_league
//! RUST_LOG=rust_orm_system::sql=trace ...   # every statement with its bound parameters
//! ```

use crate::core::error::{DatabaseError, Result};
use tracing_subscriber::EnvFilter;

/// Tracing configuration options
#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Default to debug level when `RUST_LOG` is not set
    pub debug: bool,
}

/// Install a global console subscriber filtered by `RUST_LOG` (default `info`)
///
/// # Errors
///
/// `Other` if a global subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<()> {
    let default = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.debug)
        .compact()
        .try_init()
        .map_err(|err| {
            DatabaseError::other(format!("failed to install tracing subscriber: {}", err))
        })
}
