//! # Error Handling
//!
//! Error types for credential storage operations, built with `thiserror`.
//!
//! Individual backend failures during reads and deletes are recovered inside
//! the chain (logged, next backend consulted) and never surface here. A write
//! becomes a [`CredentialError::Backend`] only when every backend in the
//! chain rejected it.

use thiserror::Error;

/// Result type for credential operations.
pub type Result<T> = std::result::Result<T, CredentialError>;

/// Errors that can occur during credential management operations.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Environment or stored credential not found.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// The stored password is past its expiry timestamp.
    #[error("Password for environment '{environment}' has expired")]
    PasswordExpired { environment: String },

    /// Every backend in the chain rejected a write.
    #[error("All backends failed: {message}")]
    Backend { message: String },

    /// Malformed input (environment name, port, recipient list, ...).
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Signature or encryption failure. Fail-closed: the caller never
    /// receives partially-verified data alongside this error.
    #[error("Security error: {message}")]
    Security { message: String },

    /// Audit-sink failure. Scoped to the collaborator; credential
    /// operations themselves do not fail on audit errors.
    #[error("Audit error: {message}")]
    Audit { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CredentialError {
    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Create a password-expired error for an environment.
    pub fn password_expired(environment: impl Into<String>) -> Self {
        Self::PasswordExpired { environment: environment.into() }
    }

    /// Create an all-backends-failed error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into() }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error tied to a specific field.
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create a security error.
    pub fn security(message: impl Into<String>) -> Self {
        Self::Security { message: message.into() }
    }

    /// Create an audit error.
    pub fn audit(message: impl Into<String>) -> Self {
        Self::Audit { message: message.into() }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }
}

impl From<validator::ValidationErrors> for CredentialError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors.field_errors().keys().next().map(|k| k.to_string());
        Self::Validation { message: errors.to_string(), field }
    }
}
