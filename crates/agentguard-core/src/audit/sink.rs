//! Append-only persistence for audit entries.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::entry::AuditLogEntry;
use super::error::{AuditError, AuditResult};

/// Append-only store for audit entries.
///
/// Implementations never rewrite or drop stored entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one entry after every previously appended entry.
    async fn append(&self, entry: &AuditLogEntry) -> AuditResult<()>;

    /// Every stored entry, oldest first.
    async fn load(&self) -> AuditResult<Vec<AuditLogEntry>>;

    /// Filesystem location, if the sink has one.
    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Newline-delimited JSON file, opened in append mode for every write.
#[derive(Debug, Clone)]
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> AuditResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn load(&self) -> AuditResult<Vec<AuditLogEntry>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AuditError::Io(e)),
        };

        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| AuditError::Corrupt {
                    line: i + 1,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// In-memory sink for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the stored entries.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> AuditResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        Ok(())
    }

    async fn load(&self) -> AuditResult<Vec<AuditLogEntry>> {
        Ok(self.entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::entry::Operation;
    use chrono::Utc;

    #[tokio::test]
    async fn test_file_sink_appends_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path().join("nested").join("audit.jsonl"));

        assert!(sink.load().await.unwrap().is_empty());

        for op in [Operation::Read, Operation::Write, Operation::List] {
            sink.append(&AuditLogEntry::success(Utc::now(), "u", op, "SOUL.md"))
                .await
                .unwrap();
        }

        let loaded = sink.load().await.unwrap();
        let ops: Vec<_> = loaded.iter().map(|e| e.operation).collect();
        assert_eq!(ops, vec![Operation::Read, Operation::Write, Operation::List]);

        let raw = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(raw.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_file_sink_reports_corrupt_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();

        let err = FileAuditSink::new(&path).load().await.unwrap_err();
        assert!(matches!(err, AuditError::Corrupt { line: 1, .. }));
    }

    #[tokio::test]
    async fn test_memory_sink_roundtrip() {
        let sink = MemoryAuditSink::new();
        sink.append(&AuditLogEntry::success(Utc::now(), "u", Operation::Read, "SOUL.md"))
            .await
            .unwrap();
        assert_eq!(sink.load().await.unwrap().len(), 1);
        assert!(sink.location().is_none());
    }
}
