//! Optional `tracing` subscriber setup.
//!
//! The crate only emits events; applications that do not install a
//! subscriber of their own can call [`init_logging`].

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "kling=info";

/// Install a formatted subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging() -> Result<()> {
    init_logging_with(DEFAULT_FILTER)
}

/// Like [`init_logging`], with `default_filter` used when `RUST_LOG` is unset.
pub fn init_logging_with(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}
