use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{newest_first, BackupError, BackupMetadata, BackupStore, Result};
use crate::digest::sha256_hex;

/// In-memory backup store backed by a `Vec<(meta, bytes)>`.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    records: Mutex<Vec<(BackupMetadata, Vec<u8>)>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn snapshot(
        &self,
        original_file: &str,
        content: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<BackupMetadata> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let meta = BackupMetadata {
            original_file: original_file.to_string(),
            backup_path: PathBuf::from(format!("memory://{original_file}/{}", records.len())),
            timestamp,
            content_hash: sha256_hex(content),
            size: content.len() as u64,
        };
        records.push((meta.clone(), content.to_vec()));
        Ok(meta)
    }

    async fn list(&self, original_file: &str) -> Result<Vec<BackupMetadata>> {
        let records = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(m, _)| m.original_file == original_file)
            .map(|(m, _)| m.clone())
            .collect();
        Ok(newest_first(records))
    }

    async fn read(&self, meta: &BackupMetadata) -> Result<Vec<u8>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(m, _)| m.backup_path == meta.backup_path)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| BackupError::NotFound(meta.backup_path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_snapshot_and_read() {
        let store = MemoryBackupStore::new();
        assert!(store.is_empty());
        let meta = store.snapshot("SOUL.md", b"abc", Utc::now()).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.read(&meta).await.unwrap(), b"abc");
        assert_eq!(store.list("SOUL.md").await.unwrap(), vec![meta]);
    }
}
