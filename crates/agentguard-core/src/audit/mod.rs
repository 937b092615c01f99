//! Audit: append-only, hash-chained record of every sandbox operation.
//!
//! # Modules
//!
//! - [`entry`]: `AuditLogEntry`, `Operation`
//! - [`chain`]: `entry_hash()`, `verify_chain()`
//! - [`sink`]: `AuditSink` trait, `FileAuditSink` (JSONL), `MemoryAuditSink`
//! - [`error`]: `AuditError` / `AuditResult`

pub mod chain;
pub mod entry;
pub mod error;
pub mod sink;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex;

pub use chain::{entry_hash, verify_chain, ChainReport};
pub use entry::{AuditLogEntry, Operation};
pub use error::{AuditError, AuditResult};
pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink};

/// Single writer over an [`AuditSink`] that maintains the chain head.
///
/// Appends hold an async mutex from hashing through persistence, so the
/// "previous entry" of every append is well defined.
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    head: Mutex<Option<String>>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("location", &self.sink.location())
            .finish_non_exhaustive()
    }
}

impl AuditLog {
    /// Open over `sink`, verifying any existing entries and resuming the
    /// chain from the newest one. A broken chain refuses to open.
    pub async fn open(sink: Arc<dyn AuditSink>) -> AuditResult<Self> {
        let existing = sink.load().await?;
        let report = verify_chain(&existing)?;
        tracing::debug!(
            event = "audit.opened",
            entries = report.entries,
            location = ?sink.location(),
        );
        Ok(Self {
            sink,
            head: Mutex::new(report.head_hash),
        })
    }

    /// A fresh log backed by a [`MemoryAuditSink`].
    pub fn in_memory() -> Self {
        Self {
            sink: Arc::new(MemoryAuditSink::new()),
            head: Mutex::new(None),
        }
    }

    /// Stamp `previous_hash`, persist, and return the stored entry.
    pub async fn append(&self, mut entry: AuditLogEntry) -> AuditResult<AuditLogEntry> {
        let mut head = self.head.lock().await;
        entry.previous_hash = head.clone();
        let hash = entry_hash(&entry)?;
        self.sink.append(&entry).await?;
        *head = Some(hash);
        Ok(entry)
    }

    /// Hash of the newest entry; anchor it elsewhere to detect tail truncation.
    pub async fn head_hash(&self) -> Option<String> {
        self.head.lock().await.clone()
    }

    pub async fn entries(&self) -> AuditResult<Vec<AuditLogEntry>> {
        self.sink.load().await
    }

    /// Re-read the sink and verify the whole chain.
    pub async fn verify(&self) -> AuditResult<ChainReport> {
        let entries = self.sink.load().await?;
        verify_chain(&entries)
    }

    pub fn location(&self) -> Option<&Path> {
        self.sink.location()
    }
}
