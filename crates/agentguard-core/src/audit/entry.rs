//! Audit log entry types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sandbox::error::{ErrorCode, SandboxError};

/// Kind of sandbox operation being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
    Delete,
    List,
    Search,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Delete => "delete",
            Operation::List => "list",
            Operation::Search => "search",
        };
        f.pad(s)
    }
}

/// One immutable record of an attempted operation.
///
/// `previous_hash` is stamped by [`super::AuditLog::append`]; callers leave it
/// empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub operation: Operation,
    pub file: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl AuditLogEntry {
    pub fn success(
        timestamp: DateTime<Utc>,
        user_id: &str,
        operation: Operation,
        file: &str,
    ) -> Self {
        Self {
            timestamp,
            user_id: user_id.into(),
            operation,
            file: file.into(),
            success: true,
            content_hash: None,
            previous_hash: None,
            error_code: None,
            error_message: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn failure(
        timestamp: DateTime<Utc>,
        user_id: &str,
        operation: Operation,
        file: &str,
        error: &SandboxError,
    ) -> Self {
        Self {
            success: false,
            error_code: error.code(),
            error_message: Some(error.to_string()),
            ..Self::success(timestamp, user_id, operation, file)
        }
    }

    pub fn with_content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = Some(hash.into());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
