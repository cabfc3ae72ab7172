//! In-process memory backend.
//!
//! Never persisted; useful for ephemeral credentials and as a fast,
//! hermetic store in tests. Thread-safe behind a `RwLock`.

use std::collections::HashMap;
use std::sync::RwLock;

use super::{BackendKind, CredentialBackend, Metadata, StoredCredential};
use crate::domain::SecretString;
use crate::errors::{CredentialError, Result};

/// Memory-backed credential store.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, StoredCredential>>,
}

impl MemoryBackend {
    /// Creates a new, empty memory backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored credentials.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn is_available(&self) -> bool {
        true
    }

    fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CredentialError::backend(format!("Memory store lock poisoned: {e}")))?;
        Ok(entries.get(key).cloned())
    }

    fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CredentialError::backend(format!("Memory store lock poisoned: {e}")))?;
        entries.insert(
            key.to_string(),
            StoredCredential {
                username: username.to_string(),
                password: password.clone(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    fn delete_credential(&self, key: &str) -> Result<bool> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CredentialError::backend(format!("Memory store lock poisoned: {e}")))?;
        Ok(entries.remove(key).is_some())
    }

    fn list_credentials(&self) -> Result<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CredentialError::backend(format!("Memory store lock poisoned: {e}")))?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
