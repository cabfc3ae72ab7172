//! # Observability
//!
//! Logging setup for binaries and tests embedding the crate. The library
//! itself only emits `tracing` events; nothing here is initialized
//! implicitly.

use tracing_subscriber::{fmt, EnvFilter};

use crate::errors::{CredentialError, Result};

/// Environment variable controlling the log filter (standard
/// `tracing_subscriber` directive syntax).
pub const LOG_FILTER_ENV: &str = "DBCREDS_LOG";

/// Install a global `tracing` subscriber.
///
/// The filter comes from `DBCREDS_LOG`, defaulting to `info` for this crate
/// and `warn` elsewhere. With `json = true` events are emitted as one JSON
/// object per line for log shippers.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new("warn,dbcreds=info"));

    let result = if json {
        tracing::subscriber::set_global_default(
            fmt().with_env_filter(filter).json().finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            fmt().with_env_filter(filter).finish(),
        )
    };

    result.map_err(|e| CredentialError::config(format!("Failed to install subscriber: {e}")))
}
