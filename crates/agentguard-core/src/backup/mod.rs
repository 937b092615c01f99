//! Backups: snapshots of prior content taken before any overwrite or delete.

pub mod fs;
pub mod memory;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::FsBackupStore;
pub use memory::MemoryBackupStore;

/// A snapshot taken before a destructive write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Sandbox-relative path of the file that was backed up.
    pub original_file: String,
    pub backup_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 hex of the snapshot bytes.
    pub content_hash: String,
    pub size: u64,
}

/// Errors from backup operations.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("backup digest mismatch for {}: expected {expected}, got {actual}", .path.display())]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("backup index line {line} is corrupt: {reason}")]
    CorruptIndex { line: usize, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Append-only snapshot store.
///
/// Guarantees:
/// - `snapshot` never overwrites an earlier backup.
/// - `list` returns the snapshots of one file, most recent first.
/// - `read` returns exactly the bytes that were snapshotted.
#[async_trait]
pub trait BackupStore: Send + Sync {
    async fn snapshot(
        &self,
        original_file: &str,
        content: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<BackupMetadata>;

    async fn list(&self, original_file: &str) -> Result<Vec<BackupMetadata>>;

    async fn read(&self, meta: &BackupMetadata) -> Result<Vec<u8>>;

    /// Filesystem location, if the store has one.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Most recent first; ties keep the later insertion first.
pub(crate) fn newest_first(mut records: Vec<BackupMetadata>) -> Vec<BackupMetadata> {
    records.reverse();
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    records
}
