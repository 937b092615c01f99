//! Error types for the sandbox module.

use serde::{Deserialize, Serialize};

use crate::audit::AuditError;
use crate::backup::BackupError;

/// Closed set of refusal codes written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PathTraversal,
    InvalidFile,
    ImmutableFile,
    SuspiciousContent,
    FileSizeExceeded,
    RateLimitExceeded,
    FileNotFound,
    IoError,
    IoTimeout,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PathTraversal => "PATH_TRAVERSAL",
            ErrorCode::InvalidFile => "INVALID_FILE",
            ErrorCode::ImmutableFile => "IMMUTABLE_FILE",
            ErrorCode::SuspiciousContent => "SUSPICIOUS_CONTENT",
            ErrorCode::FileSizeExceeded => "FILE_SIZE_EXCEEDED",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::IoTimeout => "IO_TIMEOUT",
        }
    }

    /// Whether a caller may retry the same request later.
    ///
    /// Validation refusals are terminal: they indicate a bug in the caller or
    /// an adversarial input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimitExceeded | ErrorCode::IoError | ErrorCode::IoTimeout
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Errors produced by the sandbox layer.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("path escapes the sandbox root: {path}")]
    PathTraversal { path: String },

    #[error("not an allowed self-configuration file: {name}")]
    InvalidFile { name: String },

    #[error("file is immutable: {file}")]
    ImmutableFile { file: String },

    #[error("suspicious content blocked: {reason}")]
    SuspiciousContent { reason: String },

    #[error("content size {size} bytes exceeds limit of {max} bytes")]
    FileSizeExceeded { size: u64, max: u64 },

    #[error(
        "rate limit exceeded for {user_id}: {max} operations per {window_ms}ms (retry in {retry_after_ms}ms)"
    )]
    RateLimitExceeded {
        user_id: String,
        max: usize,
        window_ms: u64,
        retry_after_ms: u64,
    },

    #[error("file not found: {file}")]
    FileNotFound { file: String },

    #[error("no backup #{index} for {file}")]
    NoBackup { file: String, index: usize },

    #[error("io error on {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation on {file} timed out after {limit_ms}ms")]
    Timeout { file: String, limit_ms: u64 },

    #[error("backup failed: {0}")]
    Backup(#[from] BackupError),

    #[error("audit trail unavailable: {0}")]
    Audit(#[from] AuditError),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

impl SandboxError {
    /// The audit code for this error. Configuration and audit failures have
    /// none: they are not per-operation refusals.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            SandboxError::PathTraversal { .. } => Some(ErrorCode::PathTraversal),
            SandboxError::InvalidFile { .. } => Some(ErrorCode::InvalidFile),
            SandboxError::ImmutableFile { .. } => Some(ErrorCode::ImmutableFile),
            SandboxError::SuspiciousContent { .. } => Some(ErrorCode::SuspiciousContent),
            SandboxError::FileSizeExceeded { .. } => Some(ErrorCode::FileSizeExceeded),
            SandboxError::RateLimitExceeded { .. } => Some(ErrorCode::RateLimitExceeded),
            SandboxError::FileNotFound { .. } | SandboxError::NoBackup { .. } => {
                Some(ErrorCode::FileNotFound)
            }
            SandboxError::Io { .. } | SandboxError::Backup(_) => Some(ErrorCode::IoError),
            SandboxError::Timeout { .. } => Some(ErrorCode::IoTimeout),
            SandboxError::Audit(_) | SandboxError::InvalidConfig(_) => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_some_and(|c| c.is_retryable())
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_serialize_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");
        let back: ErrorCode = serde_json::from_str("\"PATH_TRAVERSAL\"").unwrap();
        assert_eq!(back, ErrorCode::PathTraversal);
        assert_eq!(ErrorCode::IoTimeout.to_string(), "IO_TIMEOUT");
    }

    #[test]
    fn test_only_rate_limit_and_io_are_retryable() {
        let err = SandboxError::RateLimitExceeded {
            user_id: "u1".into(),
            max: 5,
            window_ms: 60_000,
            retry_after_ms: 10,
        };
        assert!(err.is_retryable());

        for err in [
            SandboxError::PathTraversal {
                path: "../x".into(),
            },
            SandboxError::ImmutableFile {
                file: "IDENTITY.md".into(),
            },
            SandboxError::SuspiciousContent {
                reason: "script tag".into(),
            },
        ] {
            assert!(!err.is_retryable(), "{err} must be terminal");
        }
    }

    #[test]
    fn test_config_error_has_no_code() {
        assert_eq!(SandboxError::InvalidConfig("x".into()).code(), None);
    }
}
