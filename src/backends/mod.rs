//! Credential storage backends.
//!
//! Every storage mechanism implements [`CredentialBackend`]; the
//! [`chain::BackendChain`] consults them in a fixed priority order. Failure
//! paths are `Result`/`Option` data consumed by the chain, never control
//! flow by panic.

pub mod chain;
pub mod config_file;
pub mod env;
pub mod gpg;
pub mod keychain;
pub mod memory;
#[cfg(windows)]
pub mod windows;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::{DatabaseCredentials, SecretString};
use crate::errors::{CredentialError, Result};

/// JSON metadata carried alongside a stored username/password pair.
///
/// Holds the non-secret connection fields (host, port, database, options,
/// password timestamps). Username, password, and environment are stored
/// out-of-band and never appear here.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Identifies a backend implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Windows Credential Manager via the native API.
    WindowsNative,
    /// Windows Credential Manager entries written by legacy tooling.
    LegacyWindowsNative,
    /// GPG-encrypted files with optional detached signatures.
    Gpg,
    /// Cross-platform OS credential store (Keychain, Secret Service, ...).
    Keychain,
    /// Process environment variables.
    EnvVar,
    /// JSON config files; stores metadata only, never passwords.
    ConfigFile,
    /// In-process memory; ephemeral storage and test double.
    Memory,
}

impl BackendKind {
    /// Get the canonical string representation of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WindowsNative => "windows_native",
            Self::LegacyWindowsNative => "legacy_windows_native",
            Self::Gpg => "gpg",
            Self::Keychain => "keychain",
            Self::EnvVar => "env_var",
            Self::ConfigFile => "config_file",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "windows_native" => Ok(Self::WindowsNative),
            "legacy_windows_native" => Ok(Self::LegacyWindowsNative),
            "gpg" => Ok(Self::Gpg),
            "keychain" => Ok(Self::Keychain),
            "env_var" => Ok(Self::EnvVar),
            "config_file" => Ok(Self::ConfigFile),
            "memory" => Ok(Self::Memory),
            _ => Err(format!("Unknown backend kind: {}", s)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A credential as returned by a backend: username, password, and the
/// non-secret metadata document.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub username: String,
    pub password: SecretString,
    pub metadata: Metadata,
}

impl StoredCredential {
    /// Flatten a [`DatabaseCredentials`] into the stored form.
    ///
    /// Username and password travel as separate fields; everything else
    /// (host, port, database, options, timestamps) becomes metadata.
    pub fn from_credentials(creds: &DatabaseCredentials) -> Result<Self> {
        let mut metadata = Metadata::new();
        metadata.insert("host".into(), creds.host.clone().into());
        metadata.insert("port".into(), creds.port.into());
        metadata.insert("database".into(), creds.database.clone().into());
        if !creds.options.is_empty() {
            metadata.insert(
                "options".into(),
                serde_json::to_value(&creds.options)?,
            );
        }
        metadata.insert(
            "password_updated_at".into(),
            serde_json::to_value(creds.password_updated_at)?,
        );
        if let Some(expires_at) = creds.password_expires_at {
            metadata.insert(
                "password_expires_at".into(),
                serde_json::to_value(expires_at)?,
            );
        }
        Ok(Self {
            username: creds.username.clone(),
            password: creds.password.clone(),
            metadata,
        })
    }

    /// Reassemble a [`DatabaseCredentials`] for `environment` from the
    /// stored form.
    ///
    /// Metadata written by older tooling may omit timestamps; those default
    /// to "just updated, no expiry" rather than failing the read.
    pub fn into_credentials(self, environment: &str) -> Result<DatabaseCredentials> {
        let meta = &self.metadata;

        let host = meta
            .get("host")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CredentialError::validation_field("Missing host in stored metadata", "host"))?
            .to_string();
        let port = meta
            .get("port")
            .and_then(parse_port)
            .ok_or_else(|| CredentialError::validation_field("Missing or invalid port in stored metadata", "port"))?;
        let database = meta
            .get("database")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        // Backends that only store strings (env vars) hand options back as
        // a JSON-encoded string rather than a map.
        let options: HashMap<String, serde_json::Value> = match meta.get("options") {
            Some(serde_json::Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_default()
            }
            Some(value) => serde_json::from_value(value.clone())?,
            None => HashMap::new(),
        };
        // Legacy stores carry free-form update dates; an unparseable one
        // degrades to "just updated" instead of failing the read.
        let password_updated_at = meta
            .get("password_updated_at")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_else(chrono::Utc::now);
        let password_expires_at = match meta.get("password_expires_at") {
            Some(serde_json::Value::Null) | None => None,
            Some(value) => Some(serde_json::from_value(value.clone())?),
        };

        let creds = DatabaseCredentials {
            environment: environment.to_lowercase(),
            host,
            port,
            database,
            username: self.username,
            password: self.password,
            options,
            password_updated_at,
            password_expires_at,
        };
        creds.check()?;
        Ok(creds)
    }
}

/// Accept ports stored either as JSON numbers or as strings.
fn parse_port(value: &serde_json::Value) -> Option<u16> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Contract implemented by every credential storage mechanism.
///
/// Implementations must be `Send + Sync`; the chain shares them across
/// threads behind `Arc`. All operations are synchronous blocking I/O.
pub trait CredentialBackend: Send + Sync {
    /// Which backend this is. Used for logging and chain diagnostics.
    fn kind(&self) -> BackendKind;

    /// Whether this backend can be used on the current system.
    ///
    /// Called once during chain construction; unavailable backends are
    /// skipped with a logged, non-fatal message.
    fn is_available(&self) -> bool;

    /// Retrieve a credential by storage key.
    ///
    /// Returns `Ok(None)` when the key is absent. Errors are recovered by
    /// the chain (logged, next backend consulted).
    fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>>;

    /// Store a credential under `key`, replacing any existing value.
    fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()>;

    /// Delete a credential. Returns whether an entry existed; absence is
    /// not an error.
    fn delete_credential(&self, key: &str) -> Result<bool>;

    /// List all credential keys managed by this backend.
    ///
    /// Optional; backends without enumeration support return an empty list.
    fn list_credentials(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}
