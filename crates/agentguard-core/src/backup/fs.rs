use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{newest_first, BackupError, BackupMetadata, BackupStore, Result};
use crate::digest::sha256_hex;

/// Filesystem-backed backup store.
///
/// Layout:
/// - `<root>/blobs/<file>.<UTC timestamp>.<nonce>.bak`: snapshot bytes
/// - `<root>/index.jsonl`: one `BackupMetadata` per line, append-only
pub struct FsBackupStore {
    root: PathBuf,
    blobs_dir: PathBuf,
    index_path: PathBuf,
    index_lock: Mutex<()>,
}

impl FsBackupStore {
    /// Create a store rooted at `root`. Creates `root/blobs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let blobs_dir = root.join("blobs");
        fs::create_dir_all(&blobs_dir)?;
        Ok(Self {
            index_path: root.join("index.jsonl"),
            root,
            blobs_dir,
            index_lock: Mutex::new(()),
        })
    }

    fn blob_path(&self, original_file: &str, timestamp: DateTime<Utc>) -> PathBuf {
        let flat = original_file.replace(['/', '\\'], "__");
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        self.blobs_dir.join(format!(
            "{flat}.{}.{}.bak",
            timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
            &nonce[..8]
        ))
    }

    async fn read_index(&self) -> Result<Vec<BackupMetadata>> {
        let text = match tokio::fs::read_to_string(&self.index_path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::Io(e)),
        };
        text.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).map_err(|e| BackupError::CorruptIndex {
                    line: i + 1,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

/// Write to a temp file in `dir`, then link it into place without clobbering.
fn persist_new(dir: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(target).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl BackupStore for FsBackupStore {
    async fn snapshot(
        &self,
        original_file: &str,
        content: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Result<BackupMetadata> {
        let backup_path = self.blob_path(original_file, timestamp);

        let dir = self.blobs_dir.clone();
        let target = backup_path.clone();
        let data = content.to_vec();
        tokio::task::spawn_blocking(move || persist_new(&dir, &target, &data))
            .await
            .map_err(std::io::Error::other)??;

        let meta = BackupMetadata {
            original_file: original_file.to_string(),
            backup_path,
            timestamp,
            content_hash: sha256_hex(content),
            size: content.len() as u64,
        };

        let mut line = serde_json::to_string(&meta)?;
        line.push('\n');
        let _guard = self.index_lock.lock().await;
        let mut index = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.index_path)
            .await?;
        index.write_all(line.as_bytes()).await?;
        index.sync_data().await?;

        Ok(meta)
    }

    async fn list(&self, original_file: &str) -> Result<Vec<BackupMetadata>> {
        let records = self
            .read_index()
            .await?
            .into_iter()
            .filter(|m| m.original_file == original_file)
            .collect();
        Ok(newest_first(records))
    }

    async fn read(&self, meta: &BackupMetadata) -> Result<Vec<u8>> {
        let data = tokio::fs::read(&meta.backup_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackupError::NotFound(meta.backup_path.clone())
            } else {
                BackupError::Io(e)
            }
        })?;
        let actual = sha256_hex(&data);
        if actual != meta.content_hash {
            return Err(BackupError::DigestMismatch {
                path: meta.backup_path.clone(),
                expected: meta.content_hash.clone(),
                actual,
            });
        }
        Ok(data)
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.root)
    }
}
