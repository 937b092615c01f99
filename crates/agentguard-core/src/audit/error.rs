//! Error types for the audit module.

use crate::digest::DigestError;

/// Errors produced while appending to or verifying the audit trail.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("audit digest error: {0}")]
    Digest(#[from] DigestError),

    #[error("audit line {line} is corrupt: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("hash chain broken at entry {index}: expected previous_hash {expected:?}, found {found:?}")]
    ChainBroken {
        index: usize,
        expected: Option<String>,
        found: Option<String>,
    },
}

/// Result type for audit operations.
pub type AuditResult<T> = std::result::Result<T, AuditError>;
