//! Environment-variable backend.
//!
//! Reads credentials from `DBCREDS_{ENV}_{FIELD}` variables, with a legacy
//! fallback to the `DB_SERVER`/`DB_PORT`/`DB_NAME`/`DB_USER`/`DB_PWD` set
//! written by older shell tooling. Useful for containerized deployments and
//! CI pipelines; writes only affect the current process and its children.
//!
//! # Usage
//!
//! ```bash
//! export DBCREDS_DEV_HOST=localhost
//! export DBCREDS_DEV_PORT=5432
//! export DBCREDS_DEV_DATABASE=mydb
//! export DBCREDS_DEV_USERNAME=myuser
//! export DBCREDS_DEV_PASSWORD=mypass
//! ```

use std::env;

use tracing::debug;

use super::{BackendKind, CredentialBackend, Metadata, StoredCredential};
use crate::domain::SecretString;
use crate::errors::{CredentialError, Result};
use crate::KEY_PREFIX;

const VAR_PREFIX: &str = "DBCREDS_";

/// Legacy variable set consulted when no namespaced variables exist.
const LEGACY_REQUIRED: [&str; 4] = ["DB_SERVER", "DB_PORT", "DB_NAME", "DB_USER"];

/// Environment-variable credential backend.
#[derive(Debug, Clone, Default)]
pub struct EnvVarBackend;

impl EnvVarBackend {
    /// Creates a new environment-variable backend.
    pub fn new() -> Self {
        Self
    }

    /// `dbcreds:dev` → `DBCREDS_DEV_`.
    fn var_prefix_for(key: &str) -> Option<String> {
        let env_name = key.strip_prefix(KEY_PREFIX)?;
        Some(format!("{}{}_", VAR_PREFIX, env_name.to_uppercase()))
    }

    fn read_namespaced(prefix: &str) -> Option<StoredCredential> {
        let mut metadata = Metadata::new();
        let mut username = None;
        let mut password = None;

        for (name, value) in env::vars() {
            let Some(field) = name.strip_prefix(prefix) else {
                continue;
            };
            match field.to_lowercase().as_str() {
                "username" => username = Some(value),
                "password" => password = Some(value),
                "port" => {
                    // Keep ports numeric where possible for consistency with
                    // other backends' metadata documents.
                    let parsed = value
                        .parse::<u64>()
                        .map(serde_json::Value::from)
                        .unwrap_or_else(|_| value.clone().into());
                    metadata.insert("port".into(), parsed);
                }
                field => {
                    metadata.insert(field.to_string(), value.into());
                }
            }
        }

        match (username, password) {
            (Some(username), Some(password)) => Some(StoredCredential {
                username,
                password: SecretString::new(password),
                metadata,
            }),
            _ => None,
        }
    }

    /// Legacy `DB_*` variables, consulted only when the namespaced set is
    /// absent. All four non-password variables must be present.
    fn read_legacy() -> Option<StoredCredential> {
        if !LEGACY_REQUIRED
            .iter()
            .all(|var| env::var(var).map(|v| !v.is_empty()).unwrap_or(false))
        {
            return None;
        }

        let password = env::var("DB_PWD").unwrap_or_default();
        if password.is_empty() {
            return None;
        }

        let mut metadata = Metadata::new();
        metadata.insert(
            "host".into(),
            env::var("DB_SERVER").unwrap_or_else(|_| "localhost".into()).into(),
        );
        let port = env::var("DB_PORT").ok().and_then(|p| p.parse::<u64>().ok()).unwrap_or(5432);
        metadata.insert("port".into(), port.into());
        metadata.insert("database".into(), env::var("DB_NAME").unwrap_or_default().into());
        if let Ok(updated) = env::var("DB_PWD_DATE") {
            metadata.insert("password_updated_at".into(), updated.into());
        }

        Some(StoredCredential {
            username: env::var("DB_USER").unwrap_or_default(),
            password: SecretString::new(password),
            metadata,
        })
    }
}

impl CredentialBackend for EnvVarBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::EnvVar
    }

    fn is_available(&self) -> bool {
        // The process environment always exists.
        true
    }

    fn get_credential(&self, key: &str) -> Result<Option<StoredCredential>> {
        let Some(prefix) = Self::var_prefix_for(key) else {
            return Ok(None);
        };

        if let Some(stored) = Self::read_namespaced(&prefix) {
            debug!(%key, "Found credentials in environment");
            return Ok(Some(stored));
        }

        Ok(Self::read_legacy())
    }

    fn set_credential(
        &self,
        key: &str,
        username: &str,
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<()> {
        let Some(prefix) = Self::var_prefix_for(key) else {
            return Err(CredentialError::validation(format!(
                "Key '{}' does not carry the expected '{}' prefix",
                key, KEY_PREFIX
            )));
        };

        env::set_var(format!("{prefix}USERNAME"), username);
        env::set_var(format!("{prefix}PASSWORD"), password.expose_secret());
        for (field, value) in metadata {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            env::set_var(format!("{prefix}{}", field.to_uppercase()), rendered);
        }
        Ok(())
    }

    fn delete_credential(&self, key: &str) -> Result<bool> {
        let Some(prefix) = Self::var_prefix_for(key) else {
            return Ok(false);
        };
        let to_remove: Vec<String> =
            env::vars().map(|(name, _)| name).filter(|name| name.starts_with(&prefix)).collect();
        let existed = !to_remove.is_empty();
        for name in to_remove {
            env::remove_var(name);
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global; each test uses its own environment name
    // to stay independent under the parallel test runner.

    #[test]
    fn test_var_prefix_for() {
        assert_eq!(
            EnvVarBackend::var_prefix_for("dbcreds:dev").as_deref(),
            Some("DBCREDS_DEV_")
        );
        assert_eq!(EnvVarBackend::var_prefix_for("other:dev"), None);
    }

    #[test]
    fn test_roundtrip_through_process_env() {
        let backend = EnvVarBackend::new();
        let mut metadata = Metadata::new();
        metadata.insert("host".into(), "db1".into());
        metadata.insert("port".into(), 5433.into());
        metadata.insert("database".into(), "appdb".into());

        backend
            .set_credential("dbcreds:envrt", "alice", &SecretString::new("pw"), &metadata)
            .unwrap();

        let stored = backend.get_credential("dbcreds:envrt").unwrap().unwrap();
        assert_eq!(stored.username, "alice");
        assert_eq!(stored.password.expose_secret(), "pw");
        assert_eq!(stored.metadata.get("host").unwrap(), "db1");
        assert_eq!(stored.metadata.get("port").unwrap(), &serde_json::json!(5433));

        assert!(backend.delete_credential("dbcreds:envrt").unwrap());
        assert!(backend.get_credential("dbcreds:envrt").unwrap().is_none());
    }

    #[test]
    fn test_username_without_password_is_absent() {
        let backend = EnvVarBackend::new();
        env::set_var("DBCREDS_ENVHALF_USERNAME", "alice");
        env::set_var("DBCREDS_ENVHALF_HOST", "db1");

        assert!(backend.get_credential("dbcreds:envhalf").unwrap().is_none());

        env::remove_var("DBCREDS_ENVHALF_USERNAME");
        env::remove_var("DBCREDS_ENVHALF_HOST");
    }

    #[test]
    fn test_foreign_key_prefix_ignored() {
        let backend = EnvVarBackend::new();
        assert!(backend.get_credential("somethingelse:dev").unwrap().is_none());
        assert!(!backend.delete_credential("somethingelse:dev").unwrap());
    }

    #[test]
    fn test_delete_missing_is_not_an_error() {
        let backend = EnvVarBackend::new();
        assert!(!backend.delete_credential("dbcreds:envnothere").unwrap());
    }
}
