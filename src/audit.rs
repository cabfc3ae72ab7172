//! Audit-trail collaborator interface.
//!
//! The credential store does not implement an audit trail itself; it emits
//! [`AuditEvent`]s to whatever [`AuditSink`] the embedding application
//! wires in (the reference deployment uses a git repository with signed
//! commits). Sink failures are logged and never fail the credential
//! operation that triggered them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::errors::Result;

/// What happened to a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Access,
}

impl AuditAction {
    /// Get the canonical string representation of this action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Access => "access",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// Storage key of the affected credential (`dbcreds:dev`).
    pub credential_id: String,
    /// OS user that performed the operation.
    pub user: String,
    /// Non-secret context (backend kinds, counts). Never passwords.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AuditEvent {
    /// Build an event stamped now, attributed to the current OS user.
    pub fn now(action: AuditAction, credential_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            credential_id: credential_id.into(),
            user: current_user(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Destination for audit events.
///
/// `record` returns the sink's identifier for the stored entry (a commit
/// hash for the git-backed sink).
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<String>;
}

/// Sink that drops events. The default when no audit trail is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: &AuditEvent) -> Result<String> {
        Ok(String::new())
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
