//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use dbcreds::backends::memory::MemoryBackend;
use dbcreds::backends::{CredentialBackend, Metadata, StoredCredential};
use dbcreds::{
    BackendChain, BackendKind, CredentialError, CredentialManager, DbCredsConfig, Result,
    SecretString,
};
use tempfile::TempDir;

/// Manager backed by a single in-memory backend under a temp config dir.
pub fn memory_manager() -> (TempDir, CredentialManager) {
    let dir = TempDir::new().unwrap();
    let config = DbCredsConfig::with_config_dir(dir.path());
    let chain = BackendChain::from_backends(vec![Arc::new(MemoryBackend::new())]);
    let manager = CredentialManager::with_chain(config, chain).unwrap();
    (dir, manager)
}

/// Manager over an explicit chain, keeping the temp dir alive.
pub fn manager_with_chain(chain: BackendChain) -> (TempDir, CredentialManager) {
    let dir = TempDir::new().unwrap();
    let config = DbCredsConfig::with_config_dir(dir.path());
    let manager = CredentialManager::with_chain(config, chain).unwrap();
    (dir, manager)
}

/// Backend whose writes always fail, for degradation tests.
pub struct RejectingBackend;

impl CredentialBackend for RejectingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn is_available(&self) -> bool {
        true
    }

    fn get_credential(&self, _key: &str) -> Result<Option<StoredCredential>> {
        Ok(None)
    }

    fn set_credential(
        &self,
        _key: &str,
        _username: &str,
        _password: &SecretString,
        _metadata: &Metadata,
    ) -> Result<()> {
        Err(CredentialError::backend("write rejected"))
    }

    fn delete_credential(&self, _key: &str) -> Result<bool> {
        Err(CredentialError::backend("delete rejected"))
    }
}
