//! Tracing setup for processes that embed the sync engine.

use crate::error::{Error, Result};
use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is not set.
pub const DEFAULT_DIRECTIVES: &str = "trellis=info";

/// Install a global fmt subscriber filtered by `RUST_LOG`.
///
/// Falls back to `default_directives` when `RUST_LOG` is unset or invalid.
/// Example: `RUST_LOG=trellis::sync=debug` shows every replayed event.
///
/// # Errors
///
/// Returns `Error::Config` if a global subscriber is already installed.
pub fn init_tracing(default_directives: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives)),
        )
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
