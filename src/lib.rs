//! # dbcreds
//!
//! Multi-backend database credential storage with environment management,
//! password expiry tracking, and optional GPG encryption.
//!
//! ## Architecture
//!
//! The system follows a layered architecture pattern:
//!
//! ```text
//! Caller → Credential Manager → Environment Registry
//!                ↓
//!          Backend Chain → Native Store / Keychain / Env Vars / GPG / Config File
//! ```
//!
//! ## Core Components
//!
//! - **Credential Manager**: orchestrates environments and credential
//!   storage; the single entry point for callers
//! - **Backend Chain**: priority-ordered, platform-filtered list of storage
//!   backends with fail-soft reads and fan-out writes
//! - **Environment Registry**: durable catalog of named environments
//!   persisted through the config-file backend
//! - **Password Lifecycle**: expiry state derived from stored timestamps,
//!   never persisted
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use dbcreds::{CredentialManager, CredentialsSpec, DatabaseType, DbCredsConfig, Result};
//!
//! fn main() -> Result<()> {
//!     let manager = CredentialManager::new(DbCredsConfig::default())?;
//!     manager.add_environment("dev", DatabaseType::Postgresql, None, false)?;
//!     manager.set_credentials(
//!         "dev",
//!         CredentialsSpec::new("localhost", 5432, "mydb", "user", "pass")
//!             .expires_in_days(90),
//!     )?;
//!     let creds = manager.get_credentials("dev", true)?;
//!     println!("{}", creds.connection_string(false, None));
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod backends;
pub mod config;
pub mod domain;
pub mod errors;
pub mod gpg;
pub mod manager;
pub mod observability;
pub mod probe;
pub mod registry;

// Re-export commonly used types and traits
pub use audit::{AuditAction, AuditEvent, AuditSink};
pub use backends::chain::BackendChain;
pub use backends::gpg::{GpgBackend, RotationReport};
pub use backends::{BackendKind, CredentialBackend, StoredCredential};
pub use config::{DbCredsConfig, GpgConfig};
pub use domain::{
    DatabaseCredentials, DatabaseType, Environment, PasswordState, SecretString,
};
pub use errors::{CredentialError, Result};
pub use gpg::{GpgCommand, GpgEngine};
pub use manager::{CredentialManager, CredentialsSpec};
pub use probe::ConnectionProbe;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Storage-key prefix shared by every backend.
///
/// A credential for environment `dev` is stored under `dbcreds:dev` in all
/// backends, so copies written by different backends shadow each other
/// predictably during chain reads.
pub const KEY_PREFIX: &str = "dbcreds:";

/// Build the storage key for an environment name.
///
/// Names are normalized to lowercase so `DEV` and `dev` address the same
/// stored credential.
pub fn credential_key(environment: &str) -> String {
    format!("{}{}", KEY_PREFIX, environment.to_lowercase())
}
