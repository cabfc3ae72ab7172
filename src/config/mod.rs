//! # Configuration Settings
//!
//! Settings structs for the credential manager and its backends.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

use crate::errors::{CredentialError, Result};

/// Environment variable overriding the default configuration directory.
pub const CONFIG_DIR_ENV: &str = "DBCREDS_CONFIG_DIR";

/// Main configuration for a [`crate::CredentialManager`].
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DbCredsConfig {
    /// Directory holding `environments.json`, `metadata.json`, and (by
    /// default) the GPG storage directory.
    pub config_dir: PathBuf,

    /// GPG backend configuration. `None` leaves the GPG backend out of the
    /// chain entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub gpg: Option<GpgConfig>,
}

impl Default for DbCredsConfig {
    fn default() -> Self {
        Self { config_dir: default_config_dir(), gpg: None }
    }
}

impl DbCredsConfig {
    /// Build a configuration rooted at an explicit directory.
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self { config_dir: config_dir.into(), gpg: None }
    }

    /// Build a configuration from the process environment.
    ///
    /// Honors `DBCREDS_CONFIG_DIR`; everything else takes defaults.
    pub fn from_env() -> Self {
        match std::env::var(CONFIG_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => Self::with_config_dir(dir),
            _ => Self::default(),
        }
    }

    /// Enable the GPG backend.
    pub fn with_gpg(mut self, gpg: GpgConfig) -> Self {
        self.gpg = Some(gpg);
        self
    }

    /// Validate the entire configuration.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if let Some(gpg) = &self.gpg {
            gpg.check()?;
        }
        Ok(())
    }
}

/// Configuration for the GPG-encrypted file backend.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GpgConfig {
    /// Directory for ciphertext and signature files. Defaults to
    /// `<config_dir>/gpg` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,

    /// GPG home directory (`--homedir`). `None` uses the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpg_home: Option<PathBuf>,

    /// Path or name of the gpg binary.
    #[serde(default = "default_gpg_binary")]
    pub binary: String,

    /// Public-key identifiers credentials are encrypted to.
    pub recipients: Vec<String>,

    /// Key identifier used to produce detached signatures. `None` disables
    /// signing and signature verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_key: Option<String>,

    /// Hard timeout for each gpg subprocess invocation.
    #[serde(default = "default_gpg_timeout_secs")]
    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub timeout_secs: u64,
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            gpg_home: None,
            binary: default_gpg_binary(),
            recipients: Vec::new(),
            sign_key: None,
            timeout_secs: default_gpg_timeout_secs(),
        }
    }
}

impl GpgConfig {
    /// Validate this configuration.
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.binary.is_empty() {
            return Err(CredentialError::config("GPG binary path cannot be empty"));
        }
        Ok(())
    }
}

fn default_gpg_binary() -> String {
    "gpg".to_string()
}

fn default_gpg_timeout_secs() -> u64 {
    30
}

/// Default configuration directory: `~/.dbcreds`, falling back to a
/// relative `.dbcreds` when no home directory can be resolved.
pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".dbcreds"))
        .unwrap_or_else(|| PathBuf::from(".dbcreds"))
}
