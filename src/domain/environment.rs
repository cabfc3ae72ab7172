//! Environment model and database-type enumeration.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use crate::errors::{CredentialError, Result};

/// Regex for validating environment names.
/// Names are normalized to lowercase before they are validated or stored.
pub static ENV_NAME_REGEX: std::sync::LazyLock<Regex> =
    std::sync::LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap());

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseType {
    Postgresql,
    Mysql,
    Oracle,
    Mssql,
    Sqlite,
}

impl DatabaseType {
    /// Get the canonical string representation of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
            Self::Oracle => "oracle",
            Self::Mssql => "mssql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Connection-URI scheme for synchronous drivers.
    pub fn scheme(&self) -> &'static str {
        self.as_str()
    }

    /// Connection-URI scheme for async drivers, where one exists.
    ///
    /// Falls back to the synchronous scheme for types without a
    /// well-known async variant.
    pub fn async_scheme(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql+asyncpg",
            Self::Mysql => "mysql+aiomysql",
            _ => self.scheme(),
        }
    }

    /// Conventional default port for this database type, if it has one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgresql => Some(5432),
            Self::Mysql => Some(3306),
            Self::Oracle => Some(1521),
            Self::Mssql => Some(1433),
            Self::Sqlite => None,
        }
    }
}

impl FromStr for DatabaseType {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "postgresql" => Ok(Self::Postgresql),
            "mysql" => Ok(Self::Mysql),
            "oracle" => Ok(Self::Oracle),
            "mssql" => Ok(Self::Mssql),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(CredentialError::validation_field(
                format!("Unknown database type: {}", s),
                "database_type",
            )),
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named database environment (e.g. `dev`, `staging`, `prod`).
///
/// Environment names are unique case-insensitively; the registry enforces
/// uniqueness and this model guarantees the stored form is lowercase.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Environment {
    /// Environment name, lowercase, 1-50 chars, `[a-zA-Z0-9_-]` only.
    #[validate(length(min = 1, max = 50, message = "Name must be 1-50 characters"))]
    #[validate(regex(
        path = "crate::domain::environment::ENV_NAME_REGEX",
        message = "Name may only contain letters, digits, underscores, and hyphens"
    ))]
    pub name: String,

    /// Type of database this environment connects to.
    pub database_type: DatabaseType,

    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether this is a production environment. Callers use this to gate
    /// confirmation prompts; the storage engine treats it as metadata.
    #[serde(default)]
    pub is_production: bool,

    /// When the environment was created.
    pub created_at: DateTime<Utc>,

    /// When the environment was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Environment {
    /// Create a new environment, normalizing the name to lowercase and
    /// validating its shape.
    pub fn new(
        name: &str,
        database_type: DatabaseType,
        description: Option<String>,
        is_production: bool,
    ) -> Result<Self> {
        let now = Utc::now();
        let env = Self {
            name: name.to_lowercase(),
            database_type,
            description,
            is_production,
            created_at: now,
            updated_at: now,
        };
        env.validate()?;
        Ok(env)
    }
}
