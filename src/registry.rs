//! Durable catalog of environment definitions.
//!
//! The registry is the in-memory view of `environments.json`, persisted
//! through the config-file backend. Name uniqueness is enforced here,
//! case-insensitively, on every insert.

use std::collections::BTreeMap;

use tracing::info;

use crate::backends::config_file::ConfigFileBackend;
use crate::domain::Environment;
use crate::errors::{CredentialError, Result};

/// In-memory environment catalog backed by `environments.json`.
pub struct EnvironmentRegistry {
    environments: BTreeMap<String, Environment>,
}

impl EnvironmentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { environments: BTreeMap::new() }
    }

    /// Load the catalog from disk. Invalid entries were already filtered by
    /// the backend's loader.
    pub fn load(backend: &ConfigFileBackend) -> Self {
        let mut environments = BTreeMap::new();
        for env in backend.load_environments() {
            environments.insert(env.name.clone(), env);
        }
        Self { environments }
    }

    /// Persist the catalog through the config-file backend.
    pub fn save(&self, backend: &ConfigFileBackend) -> Result<()> {
        let environments: Vec<Environment> = self.environments.values().cloned().collect();
        backend.save_environments(&environments)
    }

    /// Insert a new environment; rejects case-insensitive duplicates.
    pub fn insert(&mut self, env: Environment) -> Result<()> {
        if self.environments.contains_key(&env.name) {
            return Err(CredentialError::validation(format!(
                "Environment '{}' already exists",
                env.name
            )));
        }
        info!(environment = %env.name, "Added environment");
        self.environments.insert(env.name.clone(), env);
        Ok(())
    }

    /// Remove an environment by name (case-insensitive).
    pub fn remove(&mut self, name: &str) -> Result<Environment> {
        let normalized = name.to_lowercase();
        self.environments.remove(&normalized).ok_or_else(|| {
            CredentialError::not_found(format!("Environment '{}' not found", name))
        })
    }

    /// Look up an environment by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.environments.get(&name.to_lowercase())
    }

    /// Resolve an environment or fail with not-found.
    pub fn resolve(&self, name: &str) -> Result<&Environment> {
        self.get(name).ok_or_else(|| {
            CredentialError::not_found(format!("Environment '{}' not found", name))
        })
    }

    /// All environments, sorted by name.
    pub fn list(&self) -> Vec<Environment> {
        self.environments.values().cloned().collect()
    }

    /// Number of registered environments.
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

impl Default for EnvironmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DatabaseType;
    use tempfile::TempDir;

    fn env(name: &str) -> Environment {
        Environment::new(name, DatabaseType::Postgresql, None, false).unwrap()
    }

    #[test]
    fn test_insert_and_resolve_case_insensitive() {
        let mut registry = EnvironmentRegistry::new();
        registry.insert(env("DEV")).unwrap();

        assert!(registry.get("dev").is_some());
        assert!(registry.get("DEV").is_some());
        assert_eq!(registry.resolve("Dev").unwrap().name, "dev");
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = EnvironmentRegistry::new();
        registry.insert(env("dev")).unwrap();

        let result = registry.insert(env("DEV"));
        let error = result.unwrap_err();
        assert!(matches!(error, CredentialError::Validation { .. }));
        assert!(error.to_string().contains("already exists"));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let mut registry = EnvironmentRegistry::new();
        assert!(matches!(
            registry.remove("ghost").unwrap_err(),
            CredentialError::NotFound { .. }
        ));
    }

    #[test]
    fn test_list_sorted() {
        let mut registry = EnvironmentRegistry::new();
        for name in ["staging", "dev", "prod"] {
            registry.insert(env(name)).unwrap();
        }
        let names: Vec<String> = registry.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["dev", "prod", "staging"]);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let backend = ConfigFileBackend::new(dir.path()).unwrap();

        let mut registry = EnvironmentRegistry::new();
        registry.insert(env("dev")).unwrap();
        registry.insert(env("prod")).unwrap();
        registry.save(&backend).unwrap();

        let loaded = EnvironmentRegistry::load(&backend);
        assert_eq!(loaded.len(), 2);
        assert!(loaded.get("dev").is_some());
        assert!(loaded.get("prod").is_some());
    }
}
