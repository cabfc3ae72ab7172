//! Priority-ordered backend chain.
//!
//! The chain is built once, from a static platform-gated candidate table,
//! and its order never changes afterwards: every read, write, and delete
//! visits the same backends in the same sequence. Reads stop at the first
//! hit; writes fan out to every backend and succeed as long as one of them
//! accepted the data; deletes are best-effort everywhere.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::config_file::ConfigFileBackend;
use super::env::EnvVarBackend;
use super::gpg::GpgBackend;
use super::keychain::KeychainBackend;
use super::{BackendKind, CredentialBackend, Metadata, StoredCredential};
use crate::config::DbCredsConfig;
use crate::domain::SecretString;
use crate::errors::{CredentialError, Result};
use crate::gpg::GpgCommand;

/// Outcome of probing one chain candidate.
///
/// `Ok(None)` means "not configured for this installation" (skipped
/// quietly); `Err` means the constructor failed (skipped with a warning).
type CandidateResult = Result<Option<Arc<dyn CredentialBackend>>>;

/// The ordered, platform-filtered list of backends consulted per operation.
pub struct BackendChain {
    backends: Vec<Arc<dyn CredentialBackend>>,
}

impl BackendChain {
    /// Build the chain for this platform and configuration.
    ///
    /// Candidates are probed in priority order; any that fail to construct
    /// or report themselves unavailable are skipped without failing the
    /// chain. If nothing survives, the config-file backend is force-added
    /// so there is always at least one writable sink.
    pub fn discover(config: &DbCredsConfig) -> Self {
        type Candidate = (BackendKind, fn(&DbCredsConfig) -> CandidateResult);
        let mut candidates: Vec<Candidate> = Vec::new();

        // Platform-specific candidates first.
        #[cfg(windows)]
        {
            candidates.push((BackendKind::WindowsNative, |_config| {
                Ok(Some(
                    Arc::new(super::windows::WindowsNativeBackend::new())
                        as Arc<dyn CredentialBackend>,
                ))
            }));
            candidates.push((BackendKind::LegacyWindowsNative, |_config| {
                Ok(Some(
                    Arc::new(super::windows::LegacyWindowsBackend::new())
                        as Arc<dyn CredentialBackend>,
                ))
            }));
        }

        candidates.push((BackendKind::Gpg, |config| match &config.gpg {
            Some(gpg_config) => {
                let engine = Arc::new(GpgCommand::new(gpg_config));
                let backend = GpgBackend::new(engine, gpg_config, &config.config_dir)?;
                Ok(Some(Arc::new(backend) as Arc<dyn CredentialBackend>))
            }
            None => Ok(None),
        }));
        candidates.push((BackendKind::Keychain, |_config| {
            Ok(Some(Arc::new(KeychainBackend::new()) as Arc<dyn CredentialBackend>))
        }));
        candidates.push((BackendKind::EnvVar, |_config| {
            Ok(Some(Arc::new(EnvVarBackend::new()) as Arc<dyn CredentialBackend>))
        }));
        candidates.push((BackendKind::ConfigFile, |config| {
            Ok(Some(Arc::new(ConfigFileBackend::new(&config.config_dir)?)
                as Arc<dyn CredentialBackend>))
        }));

        Self::assemble(&candidates, config)
    }

    /// Probe candidates in order, then force-append the config-file backend
    /// if nothing survived.
    fn assemble(
        candidates: &[(BackendKind, fn(&DbCredsConfig) -> CandidateResult)],
        config: &DbCredsConfig,
    ) -> Self {
        let mut backends: Vec<Arc<dyn CredentialBackend>> = Vec::new();
        for (kind, constructor) in candidates {
            match constructor(config) {
                Ok(Some(backend)) => {
                    if backend.is_available() {
                        debug!(backend = %kind, "Initialized backend");
                        backends.push(backend);
                    } else {
                        debug!(backend = %kind, "Backend unavailable, skipping");
                    }
                }
                Ok(None) => {
                    debug!(backend = %kind, "Backend not configured, skipping");
                }
                Err(error) => {
                    warn!(backend = %kind, %error, "Failed to initialize backend");
                }
            }
        }

        if backends.is_empty() {
            warn!("No credential backends available, falling back to config file only");
            match ConfigFileBackend::new(&config.config_dir) {
                Ok(backend) => backends.push(Arc::new(backend)),
                Err(error) => {
                    // Config dir not even creatable; leave the chain empty
                    // and let writes surface the aggregate failure.
                    warn!(%error, "Config-file fallback unavailable");
                }
            }
        }

        Self { backends }
    }

    /// Build a chain from explicit backends, in the given priority order.
    pub fn from_backends(backends: Vec<Arc<dyn CredentialBackend>>) -> Self {
        Self { backends }
    }

    /// Backends in priority order.
    pub fn backends(&self) -> &[Arc<dyn CredentialBackend>] {
        &self.backends
    }

    /// Kinds in priority order, for diagnostics.
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.backends.iter().map(|b| b.kind()).collect()
    }

    /// Number of backends in the chain.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Read `key`, returning the first hit in priority order.
    ///
    /// A backend error is logged and treated as absence for that backend;
    /// the scan continues.
    pub fn get_credential(&self, key: &str) -> Option<(BackendKind, StoredCredential)> {
        for backend in &self.backends {
            match backend.get_credential(key) {
                Ok(Some(stored)) => {
                    debug!(backend = %backend.kind(), %key, "Retrieved credential");
                    return Some((backend.kind(), stored));
                }
                Ok(None) => {}
                Err(error) => {
                    debug!(backend = %backend.kind(), %key, %error, "Backend read failed");
                }
            }
        }
        None
    }

    /// Write `key` to every backend (best-effort replication).
    ///
    /// Succeeds if at least one backend accepted the write; returns an
    /// aggregate [`CredentialError::Backend`] naming every failure when none
    /// did.
    pub fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut stored = 0usize;
        let mut failures: Vec<String> = Vec::new();

        for backend in &self.backends {
            match backend.set_credential(key, username, password, metadata) {
                Ok(()) => {
                    debug!(backend = %backend.kind(), %key, "Stored credential");
                    stored += 1;
                }
                Err(error) => {
                    debug!(backend = %backend.kind(), %key, %error, "Backend write failed");
                    failures.push(format!("{}: {}", backend.kind(), error));
                }
            }
        }

        if stored == 0 {
            return Err(CredentialError::backend(if failures.is_empty() {
                "no backends in chain".to_string()
            } else {
                failures.join("; ")
            }));
        }
        info!(%key, stored, total = self.backends.len(), "Credential replicated");
        Ok(())
    }

    /// Delete `key` from every backend, best-effort.
    ///
    /// Returns how many backends actually held (and removed) the key.
    /// Individual failures and absences never abort the loop.
    pub fn delete_credential(&self, key: &str) -> usize {
        let mut deleted = 0usize;
        for backend in &self.backends {
            match backend.delete_credential(key) {
                Ok(true) => {
                    debug!(backend = %backend.kind(), %key, "Deleted credential");
                    deleted += 1;
                }
                Ok(false) => {}
                Err(error) => {
                    debug!(backend = %backend.kind(), %key, %error, "Backend delete failed");
                }
            }
        }
        deleted
    }
}
