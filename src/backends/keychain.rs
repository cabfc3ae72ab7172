//! Cross-platform OS keychain backend.
//!
//! Stores credentials in the platform's native credential store (Keychain on
//! macOS, Credential Manager on Windows, Secret Service on Linux) through
//! the `keyring` crate. The whole credential (username, password, and
//! metadata) is serialized into a single JSON document held as the entry's
//! secret, so one keychain item fully describes one environment.

use keyring::Entry;
use tracing::debug;

use super::{BackendKind, CredentialBackend, Metadata, StoredCredential};
use crate::domain::SecretString;
use crate::errors::{CredentialError, Result};

/// Service name all entries are registered under.
const SERVICE_NAME: &str = "dbcreds";

/// Keychain-based credential storage backend.
#[derive(Debug, Clone, Default)]
pub struct KeychainBackend;

impl KeychainBackend {
    /// Creates a new keychain backend.
    pub fn new() -> Self {
        Self
    }

    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key)
            .map_err(|e| CredentialError::backend(format!("Keychain entry for '{}': {}", key, e)))
    }
}

impl CredentialBackend for KeychainBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Keychain
    }

    fn is_available(&self) -> bool {
        // Probe with a read of a key that is allowed not to exist; only a
        // store-level failure marks the backend unavailable.
        match Self::entry("availability-probe") {
            Ok(entry) => match entry.get_password() {
                Ok(_) | Err(keyring::Error::NoEntry) => true,
                Err(error) => {
                    debug!(%error, "Keychain not available");
                    false
                }
            },
            Err(error) => {
                debug!(%error, "Keychain not available");
                false
            }
        }
    }

    fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>> {
        let entry = Self::entry(key)?;
        let raw = match entry.get_password() {
            Ok(raw) => raw,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => {
                return Err(CredentialError::backend(format!(
                    "Keychain read for '{}': {}",
                    key, error
                )))
            }
        };

        let mut document: Metadata = serde_json::from_str(&raw)?;
        let username = document
            .remove("username")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let password = document
            .remove("password")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        Ok(Some(StoredCredential {
            username,
            password: SecretString::new(password),
            metadata: document,
        }))
    }

    fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut document = metadata.clone();
        document.insert("username".into(), username.into());
        document.insert("password".into(), password.expose_secret().into());
        let raw = serde_json::to_string(&document)?;

        Self::entry(key)?
            .set_password(&raw)
            .map_err(|e| CredentialError::backend(format!("Keychain write for '{}': {}", key, e)))
    }

    fn delete_credential(&self, key: &str) -> Result<bool> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(error) => Err(CredentialError::backend(format!(
                "Keychain delete for '{}': {}",
                key, error
            ))),
        }
    }

    // The keyring API offers no portable enumeration, so `list_credentials`
    // keeps the default empty implementation.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static MOCK_STORE: Once = Once::new();

    /// Route all keyring entries to the in-memory mock store so tests never
    /// touch the real OS keychain.
    fn use_mock_store() {
        MOCK_STORE.call_once(|| {
            keyring::set_default_credential_builder(keyring::mock::default_credential_builder());
        });
    }

    fn sample_metadata() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("host".into(), "localhost".into());
        metadata.insert("port".into(), 5432.into());
        metadata.insert("database".into(), "mydb".into());
        metadata
    }

    #[test]
    fn test_available_with_mock_store() {
        use_mock_store();
        assert!(KeychainBackend::new().is_available());
    }

    #[test]
    fn test_roundtrip() {
        use_mock_store();
        let backend = KeychainBackend::new();
        backend
            .set_credential("dbcreds:kc-dev", "alice", &SecretString::new("pw"), &sample_metadata())
            .unwrap();

        let stored = backend.get_credential("dbcreds:kc-dev").unwrap().unwrap();
        assert_eq!(stored.username, "alice");
        assert_eq!(stored.password.expose_secret(), "pw");
        assert_eq!(stored.metadata.get("host").unwrap(), "localhost");
        assert!(!stored.metadata.contains_key("password"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        use_mock_store();
        let backend = KeychainBackend::new();
        assert!(backend.get_credential("dbcreds:kc-none").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        use_mock_store();
        let backend = KeychainBackend::new();
        backend
            .set_credential("dbcreds:kc-del", "a", &SecretString::new("p"), &sample_metadata())
            .unwrap();
        assert!(backend.delete_credential("dbcreds:kc-del").unwrap());
        assert!(!backend.delete_credential("dbcreds:kc-del").unwrap());
    }

    #[test]
    fn test_overwrite_replaces_document() {
        use_mock_store();
        let backend = KeychainBackend::new();
        backend
            .set_credential("dbcreds:kc-ow", "a", &SecretString::new("p1"), &sample_metadata())
            .unwrap();
        backend
            .set_credential("dbcreds:kc-ow", "b", &SecretString::new("p2"), &sample_metadata())
            .unwrap();

        let stored = backend.get_credential("dbcreds:kc-ow").unwrap().unwrap();
        assert_eq!(stored.username, "b");
        assert_eq!(stored.password.expose_secret(), "p2");
    }
}
