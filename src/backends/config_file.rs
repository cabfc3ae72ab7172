//! JSON config-file backend.
//!
//! Stores environment definitions (`environments.json`) and non-sensitive
//! credential metadata (`metadata.json`). Passwords are never written here;
//! this backend is the guaranteed fallback sink, so the chain can always
//! persist connection metadata even when every secure store is unavailable.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use super::{BackendKind, CredentialBackend, Metadata, StoredCredential};
use crate::domain::{Environment, SecretString};
use crate::errors::Result;

const ENVIRONMENTS_FILE: &str = "environments.json";
const METADATA_FILE: &str = "metadata.json";

/// Config-file backend rooted at a configuration directory.
pub struct ConfigFileBackend {
    config_dir: PathBuf,
    environments_file: PathBuf,
    metadata_file: PathBuf,
}

impl ConfigFileBackend {
    /// Create a backend rooted at `config_dir`, creating the directory if
    /// needed.
    pub fn new(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        fs::create_dir_all(&config_dir)?;
        Ok(Self {
            environments_file: config_dir.join(ENVIRONMENTS_FILE),
            metadata_file: config_dir.join(METADATA_FILE),
            config_dir,
        })
    }

    /// Directory this backend persists into.
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load environment definitions from `environments.json`.
    ///
    /// A missing file is an empty catalog; a corrupt file is logged and
    /// treated as empty rather than wedging startup.
    pub fn load_environments(&self) -> Vec<Environment> {
        if !self.environments_file.exists() {
            return Vec::new();
        }
        match fs::read_to_string(&self.environments_file)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
        {
            Ok(environments) => environments,
            Err(error) => {
                error!(%error, path = %self.environments_file.display(), "Failed to load environments");
                Vec::new()
            }
        }
    }

    /// Persist environment definitions to `environments.json`.
    pub fn save_environments(&self, environments: &[Environment]) -> Result<()> {
        let raw = serde_json::to_string_pretty(environments)?;
        fs::write(&self.environments_file, raw)?;
        Ok(())
    }

    fn load_metadata(&self) -> BTreeMap<String, serde_json::Value> {
        if !self.metadata_file.exists() {
            return BTreeMap::new();
        }
        match fs::read_to_string(&self.metadata_file)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
        {
            Ok(metadata) => metadata,
            Err(error) => {
                error!(%error, path = %self.metadata_file.display(), "Failed to load metadata");
                BTreeMap::new()
            }
        }
    }

    fn save_metadata(&self, metadata: &BTreeMap<String, serde_json::Value>) -> Result<()> {
        let raw = serde_json::to_string_pretty(metadata)?;
        fs::write(&self.metadata_file, raw)?;
        Ok(())
    }
}

impl CredentialBackend for ConfigFileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ConfigFile
    }

    fn is_available(&self) -> bool {
        // Availability means the directory is writable.
        let probe = self.config_dir.join(".probe");
        match fs::write(&probe, b"") {
            Ok(()) => {
                let _ = fs::remove_file(&probe);
                true
            }
            Err(error) => {
                debug!(%error, dir = %self.config_dir.display(), "Config directory not writable");
                false
            }
        }
    }

    fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>> {
        let store = self.load_metadata();
        let Some(entry) = store.get(key) else {
            return Ok(None);
        };
        let mut metadata: Metadata = match entry {
            serde_json::Value::Object(map) => map.clone(),
            _ => return Ok(None),
        };
        let username = metadata
            .remove("username")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        // Passwords are never stored in config files.
        Ok(Some(StoredCredential {
            username,
            password: SecretString::default(),
            metadata,
        }))
    }

    fn set_credential(
        &self,
        key: &str,
        username: &str,
        _password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()> {
        let mut store = self.load_metadata();
        let mut entry = metadata.clone();
        entry.insert("username".into(), username.into());
        // Drop the password if a caller smuggled it into metadata.
        entry.remove("password");
        store.insert(key.to_string(), serde_json::Value::Object(entry));
        self.save_metadata(&store)
    }

    fn delete_credential(&self, key: &str) -> Result<bool> {
        let mut store = self.load_metadata();
        if store.remove(key).is_none() {
            return Ok(false);
        }
        self.save_metadata(&store)?;
        Ok(true)
    }

    fn list_credentials(&self) -> Result<Vec<String>> {
        Ok(self.load_metadata().into_keys().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DatabaseType;
    use tempfile::TempDir;

    fn backend() -> (TempDir, ConfigFileBackend) {
        let dir = TempDir::new().unwrap();
        let backend = ConfigFileBackend::new(dir.path()).unwrap();
        (dir, backend)
    }

    fn sample_metadata() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("host".into(), "localhost".into());
        metadata.insert("port".into(), 5432.into());
        metadata.insert("database".into(), "mydb".into());
        metadata
    }

    #[test]
    fn test_available_in_writable_dir() {
        let (_dir, backend) = backend();
        assert!(backend.is_available());
    }

    #[test]
    fn test_set_and_get_stores_metadata_without_password() {
        let (_dir, backend) = backend();
        backend
            .set_credential(
                "dbcreds:dev",
                "alice",
                &SecretString::new("secret"),
                &sample_metadata(),
            )
            .unwrap();

        let stored = backend.get_credential("dbcreds:dev").unwrap().unwrap();
        assert_eq!(stored.username, "alice");
        assert!(stored.password.is_empty());
        assert_eq!(stored.metadata.get("host").unwrap(), "localhost");

        // The password must not appear anywhere on disk.
        let raw = std::fs::read_to_string(backend.metadata_file.clone()).unwrap();
        assert!(!raw.contains("secret"));
    }

    #[test]
    fn test_password_in_metadata_is_stripped() {
        let (_dir, backend) = backend();
        let mut metadata = sample_metadata();
        metadata.insert("password".into(), "oops".into());
        backend
            .set_credential("dbcreds:dev", "alice", &SecretString::new("pw"), &metadata)
            .unwrap();

        let raw = std::fs::read_to_string(backend.metadata_file.clone()).unwrap();
        assert!(!raw.contains("oops"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (_dir, backend) = backend();
        assert!(backend.get_credential("dbcreds:nope").unwrap().is_none());
    }

    #[test]
    fn test_delete() {
        let (_dir, backend) = backend();
        backend
            .set_credential("dbcreds:dev", "a", &SecretString::new("p"), &sample_metadata())
            .unwrap();
        assert!(backend.delete_credential("dbcreds:dev").unwrap());
        assert!(!backend.delete_credential("dbcreds:dev").unwrap());
        assert!(backend.get_credential("dbcreds:dev").unwrap().is_none());
    }

    #[test]
    fn test_list_credentials() {
        let (_dir, backend) = backend();
        for env in ["dev", "prod"] {
            backend
                .set_credential(
                    &format!("dbcreds:{env}"),
                    "u",
                    &SecretString::new("p"),
                    &sample_metadata(),
                )
                .unwrap();
        }
        let mut keys = backend.list_credentials().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["dbcreds:dev", "dbcreds:prod"]);
    }

    #[test]
    fn test_environments_roundtrip() {
        let (_dir, backend) = backend();
        assert!(backend.load_environments().is_empty());

        let envs = vec![
            Environment::new("dev", DatabaseType::Postgresql, None, false).unwrap(),
            Environment::new("prod", DatabaseType::Mysql, Some("primary".into()), true).unwrap(),
        ];
        backend.save_environments(&envs).unwrap();

        let loaded = backend.load_environments();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "dev");
        assert_eq!(loaded[1].name, "prod");
        assert!(loaded[1].is_production);
    }

    #[test]
    fn test_corrupt_environments_file_treated_as_empty() {
        let (_dir, backend) = backend();
        std::fs::write(&backend.environments_file, "{not json").unwrap();
        assert!(backend.load_environments().is_empty());
    }
}
