//! `SandboxManager`: the guarded read/write/delete/list/search surface.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::Instrument;

use super::content_guard::{ContentGuard, ContentValidationRule, DEFAULT_MAX_FILE_SIZE};
use super::error::{SandboxError, SandboxResult};
use super::files::AllowedFile;
use super::path_guard::{canonical_ancestor, normalize, validate_path, ValidatedPath};
use super::rate_limit::{RateLimitConfig, RateLimiter};
use crate::audit::{AuditLog, AuditLogEntry, Operation};
use crate::backup::{BackupMetadata, BackupStore};
use crate::clock::{Clock, SystemClock};
use crate::digest::sha256_hex;
use crate::obs;

/// Audit `file` value for operations that span the whole sandbox.
pub const ALL_FILES: &str = "*";

/// Configuration for a sandbox over one root directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxConfig {
    /// Directory holding the self-configuration documents.
    pub root: PathBuf,
    /// Largest accepted write, in bytes.
    pub max_file_size: u64,
    /// Wall-clock limit for each read, snapshot, or scan step (milliseconds).
    /// Renames and removals are never cut short once started.
    pub io_timeout_ms: u64,
    pub rate_limit: RateLimitConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspace"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            io_timeout_ms: 5_000,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl SandboxConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    fn validate(&self) -> SandboxResult<()> {
        if self.io_timeout_ms == 0 {
            return Err(SandboxError::InvalidConfig(
                "io_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.rate_limit.window_ms == 0 {
            return Err(SandboxError::InvalidConfig(
                "rate_limit.window_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub file: String,
    pub bytes: u64,
    /// SHA-256 hex of the new content.
    pub content_hash: String,
    /// Snapshot of the replaced content, absent when the file was new.
    pub backup: Option<BackupMetadata>,
    pub warnings: Vec<String>,
}

/// Result of a successful delete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub file: String,
    pub backup: BackupMetadata,
}

/// One existing document in the sandbox root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub file: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub immutable: bool,
}

/// One matching line from [`SandboxManager::search`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchMatch {
    pub file: String,
    /// 1-based.
    pub line_number: usize,
    pub line: String,
}

struct SearchScan {
    matches: Vec<SearchMatch>,
    scanned: BTreeMap<String, String>,
}

/// Per-file lock held from validation until the audit entry is written.
type FileGuard = tokio::sync::OwnedMutexGuard<()>;

/// Orchestrates the guards around every operation on the sandbox root.
///
/// Every public operation appends exactly one [`AuditLogEntry`], whether it
/// succeeds or is refused. Each one runs on its own task: a caller that stops
/// waiting detaches the operation instead of cancelling it, and the entry is
/// still written. Clones share all state with the original.
#[derive(Clone)]
pub struct SandboxManager {
    root: PathBuf,
    config: SandboxConfig,
    content: Arc<ContentGuard>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
    audit: Arc<AuditLog>,
    backups: Arc<dyn BackupStore>,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// `true` if `path`, once resolved, lies at or under `root`.
fn lies_within(root: &Path, canonical_root: &Path, path: &Path) -> bool {
    let absolute = if path.is_absolute() {
        normalize(path)
    } else {
        match std::env::current_dir() {
            Ok(cwd) => normalize(&cwd.join(path)),
            Err(_) => normalize(path),
        }
    };
    absolute.starts_with(root)
        || canonical_ancestor(&absolute).is_some_and(|real| real.starts_with(canonical_root))
}

/// Write-temp-then-rename in the target's directory.
fn replace_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "target has no parent")
    })?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn decode(bytes: Vec<u8>) -> std::io::Result<String> {
    String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl SandboxManager {
    /// Build a manager over `config.root`, creating the directory if needed.
    ///
    /// Refuses an audit log or backup store located inside the root: the
    /// agent must not be able to reach its own trail.
    pub fn new(
        config: SandboxConfig,
        audit: Arc<AuditLog>,
        backups: Arc<dyn BackupStore>,
    ) -> SandboxResult<Self> {
        config.validate()?;

        let root_display = config.root.display().to_string();
        std::fs::create_dir_all(&config.root).map_err(|source| SandboxError::Io {
            file: root_display.clone(),
            source,
        })?;
        let root = config
            .root
            .canonicalize()
            .map_err(|source| SandboxError::Io {
                file: root_display,
                source,
            })?;
        let lexical_root = normalize(&std::env::current_dir().unwrap_or_default().join(&config.root));

        if let Some(path) = audit.location() {
            if lies_within(&lexical_root, &root, path) {
                return Err(SandboxError::InvalidConfig(format!(
                    "audit log {} lies inside the sandbox root",
                    path.display()
                )));
            }
        }
        if let Some(path) = backups.location() {
            if lies_within(&lexical_root, &root, path) {
                return Err(SandboxError::InvalidConfig(format!(
                    "backup store {} lies inside the sandbox root",
                    path.display()
                )));
            }
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            content: Arc::new(ContentGuard::with_defaults(config.max_file_size)),
            limiter: Arc::new(RateLimiter::new(config.rate_limit, clock.clone())),
            clock,
            root,
            config,
            audit,
            backups,
            locks: Arc::default(),
        })
    }

    /// Replace the time source for timestamps and rate limiting.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.limiter = Arc::new(RateLimiter::new(self.config.rate_limit, clock.clone()));
        self.clock = clock;
        self
    }

    /// Replace the content rule set. The size limit is kept.
    pub fn with_content_rules(mut self, rules: Vec<ContentValidationRule>) -> Self {
        self.content = Arc::new(ContentGuard::new(rules, self.config.max_file_size));
        self
    }

    /// Canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    // -- public operations -------------------------------------------------

    pub async fn read(&self, user_id: &str, file: &str) -> SandboxResult<String> {
        let (user, name) = (user_id.to_string(), file.to_string());
        self.detached(Operation::Read, user_id, file, move |this| async move {
            let mut held = None;
            let result = this.read_inner(&user, &name, &mut held).await;
            this.finish(Operation::Read, &user, &name, result, |content, entry| {
                entry
                    .with_content_hash(sha256_hex(content.as_bytes()))
                    .with_metadata("bytes", json!(content.len()))
            })
            .await
        })
        .await
    }

    pub async fn write(&self, user_id: &str, file: &str, content: &str) -> SandboxResult<WriteOutcome> {
        let (user, name, content) = (user_id.to_string(), file.to_string(), content.to_string());
        self.detached(Operation::Write, user_id, file, move |this| async move {
            let mut held = None;
            let result = this.write_inner(&user, &name, &content, &mut held).await;
            this.finish(Operation::Write, &user, &name, result, describe_write)
                .await
        })
        .await
    }

    pub async fn delete(&self, user_id: &str, file: &str) -> SandboxResult<DeleteOutcome> {
        let (user, name) = (user_id.to_string(), file.to_string());
        self.detached(Operation::Delete, user_id, file, move |this| async move {
            let mut held = None;
            let result = this.delete_inner(&user, &name, &mut held).await;
            this.finish(Operation::Delete, &user, &name, result, |outcome, entry| {
                entry
                    .with_content_hash(outcome.backup.content_hash.clone())
                    .with_metadata("backup_path", json!(outcome.backup.backup_path))
            })
            .await
        })
        .await
    }

    /// Existing documents in the root.
    pub async fn list(&self, user_id: &str) -> SandboxResult<Vec<FileInfo>> {
        let user = user_id.to_string();
        self.detached(Operation::List, user_id, ALL_FILES, move |this| async move {
            let result = this.bounded(ALL_FILES, this.list_inner()).await;
            this.finish(Operation::List, &user, ALL_FILES, result, |files, entry| {
                entry.with_metadata("count", json!(files.len()))
            })
            .await
        })
        .await
    }

    /// Case-insensitive line search over the existing documents.
    ///
    /// An empty query matches nothing.
    pub async fn search(&self, user_id: &str, query: &str) -> SandboxResult<Vec<SearchMatch>> {
        let (user, query) = (user_id.to_string(), query.to_string());
        self.detached(Operation::Search, user_id, ALL_FILES, move |this| async move {
            let result = this.bounded(ALL_FILES, this.search_inner(&query)).await;
            let scan = this
                .finish(Operation::Search, &user, ALL_FILES, result, |scan, entry| {
                    entry
                        .with_metadata("query", json!(query))
                        .with_metadata("match_count", json!(scan.matches.len()))
                        .with_metadata("scanned", json!(scan.scanned))
                })
                .await?;
            Ok(scan.matches)
        })
        .await
    }

    /// Snapshots of `file`, most recent first. Not audited: backups live
    /// outside the sandbox and are never exposed to the agent.
    pub async fn backups(&self, file: &str) -> SandboxResult<Vec<BackupMetadata>> {
        let target = validate_path(&self.root, file).into_validated()?;
        Ok(self.backups.list(&target.relative_path).await?)
    }

    /// Write the `index`-th most recent snapshot of `file` back through the
    /// full write pipeline. Audited as a write.
    pub async fn restore(&self, user_id: &str, file: &str, index: usize) -> SandboxResult<WriteOutcome> {
        let (user, name) = (user_id.to_string(), file.to_string());
        self.detached(Operation::Write, user_id, file, move |this| async move {
            let mut held = None;
            let result = match this.bounded(&name, this.snapshot_content(&name, index)).await {
                Ok(content) => this.write_inner(&user, &name, &content, &mut held).await,
                Err(err) => Err(err),
            };
            this.finish(Operation::Write, &user, &name, result, describe_write)
                .await
        })
        .await
    }

    /// Run one audited operation to completion on its own task.
    ///
    /// Dropping the returned future detaches the task. A task that panics is
    /// audited here as an I/O failure.
    async fn detached<T, F, Fut>(
        &self,
        operation: Operation,
        user_id: &str,
        file: &str,
        run: F,
    ) -> SandboxResult<T>
    where
        T: Send + 'static,
        F: FnOnce(SandboxManager) -> Fut,
        Fut: Future<Output = SandboxResult<T>> + Send + 'static,
    {
        let span = obs::operation_span(operation, user_id, file);
        let task = tokio::spawn(run(self.clone()).instrument(span.clone()));
        match task.await {
            Ok(result) => result,
            Err(join_error) => {
                let err = SandboxError::Io {
                    file: file.to_string(),
                    source: std::io::Error::other(join_error),
                };
                self.finish(operation, user_id, file, Err(err), |_: &T, entry| entry)
                    .instrument(span)
                    .await
            }
        }
    }

    // -- pipeline steps ----------------------------------------------------

    /// Lock for `key`. Locks nobody holds or waits on are dropped here.
    fn file_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key.to_string()).or_default().clone()
    }

    async fn hold(&self, target: &ValidatedPath, held: &mut Option<FileGuard>) {
        *held = Some(self.file_lock(&target.relative_path).lock_owned().await);
    }

    /// Run `fut` under the configured I/O timeout.
    async fn bounded<T>(
        &self,
        file: &str,
        fut: impl Future<Output = SandboxResult<T>>,
    ) -> SandboxResult<T> {
        tokio::time::timeout(self.config.io_timeout(), fut)
            .await
            .map_err(|_| SandboxError::Timeout {
                file: file.to_string(),
                limit_ms: self.config.io_timeout_ms,
            })?
    }

    fn io_error(file: &str, source: std::io::Error) -> SandboxError {
        if source.kind() == std::io::ErrorKind::NotFound {
            SandboxError::FileNotFound {
                file: file.to_string(),
            }
        } else {
            SandboxError::Io {
                file: file.to_string(),
                source,
            }
        }
    }

    fn reject_immutable(target: &ValidatedPath) -> SandboxResult<()> {
        if target.file.is_immutable() {
            return Err(SandboxError::ImmutableFile {
                file: target.relative_path.clone(),
            });
        }
        Ok(())
    }

    /// Current bytes of `target`, or `None` if it does not exist yet.
    async fn existing_bytes(&self, target: &ValidatedPath) -> SandboxResult<Option<Vec<u8>>> {
        self.bounded(&target.relative_path, async {
            match tokio::fs::read(&target.resolved).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(Self::io_error(&target.relative_path, e)),
            }
        })
        .await
    }

    async fn snapshot(&self, target: &ValidatedPath, content: &[u8]) -> SandboxResult<BackupMetadata> {
        let meta = self
            .bounded(&target.relative_path, async {
                Ok(self
                    .backups
                    .snapshot(&target.relative_path, content, self.clock.now())
                    .await?)
            })
            .await?;
        obs::emit_backup_created(&meta);
        Ok(meta)
    }

    async fn read_inner(
        &self,
        user_id: &str,
        file: &str,
        held: &mut Option<FileGuard>,
    ) -> SandboxResult<String> {
        let target = validate_path(&self.root, file).into_validated()?;
        self.hold(&target, held).await;

        self.limiter.check(user_id)?;

        let rel = target.relative_path.as_str();
        self.bounded(rel, async {
            let bytes = tokio::fs::read(&target.resolved)
                .await
                .map_err(|e| Self::io_error(rel, e))?;
            decode(bytes).map_err(|e| Self::io_error(rel, e))
        })
        .await
    }

    async fn write_inner(
        &self,
        user_id: &str,
        file: &str,
        content: &str,
        held: &mut Option<FileGuard>,
    ) -> SandboxResult<WriteOutcome> {
        let target = validate_path(&self.root, file).into_validated()?;
        Self::reject_immutable(&target)?;
        self.hold(&target, held).await;

        self.limiter.check(user_id)?;
        let warnings = self.content.check(content)?;

        let backup = match self.existing_bytes(&target).await? {
            Some(old) => Some(self.snapshot(&target, &old).await?),
            None => None,
        };

        // Not bounded: a started rename always lands, so wait for its result.
        let path = target.resolved.clone();
        let data = content.as_bytes().to_vec();
        tokio::task::spawn_blocking(move || replace_file(&path, &data))
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r)
            .map_err(|e| Self::io_error(&target.relative_path, e))?;

        Ok(WriteOutcome {
            file: target.relative_path.clone(),
            bytes: content.len() as u64,
            content_hash: sha256_hex(content.as_bytes()),
            backup,
            warnings,
        })
    }

    async fn delete_inner(
        &self,
        user_id: &str,
        file: &str,
        held: &mut Option<FileGuard>,
    ) -> SandboxResult<DeleteOutcome> {
        let target = validate_path(&self.root, file).into_validated()?;
        Self::reject_immutable(&target)?;
        self.hold(&target, held).await;

        self.limiter.check(user_id)?;

        let rel = target.relative_path.as_str();
        let old = self
            .existing_bytes(&target)
            .await?
            .ok_or_else(|| SandboxError::FileNotFound {
                file: rel.to_string(),
            })?;
        let backup = self.snapshot(&target, &old).await?;

        // Not bounded, for the same reason as the rename in `write_inner`.
        tokio::fs::remove_file(&target.resolved)
            .await
            .map_err(|e| Self::io_error(rel, e))?;

        Ok(DeleteOutcome {
            file: target.relative_path.clone(),
            backup,
        })
    }

    async fn list_inner(&self) -> SandboxResult<Vec<FileInfo>> {
        let mut files = Vec::new();
        for allowed in AllowedFile::ALL {
            let path = self.root.join(allowed.name());
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::io_error(allowed.name(), e)),
            };
            files.push(FileInfo {
                file: allowed.name().to_string(),
                size: meta.len(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
                immutable: allowed.is_immutable(),
            });
        }
        Ok(files)
    }

    async fn search_inner(&self, query: &str) -> SandboxResult<SearchScan> {
        let needle = query.to_lowercase();
        let mut scan = SearchScan {
            matches: Vec::new(),
            scanned: BTreeMap::new(),
        };
        if needle.is_empty() {
            return Ok(scan);
        }

        for info in self.list_inner().await? {
            let bytes = match tokio::fs::read(self.root.join(&info.file)).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Self::io_error(&info.file, e)),
            };
            scan.scanned.insert(info.file.clone(), sha256_hex(&bytes));
            let text = String::from_utf8_lossy(&bytes);
            scan.matches.extend(
                text.lines()
                    .enumerate()
                    .filter(|(_, line)| line.to_lowercase().contains(&needle))
                    .map(|(i, line)| SearchMatch {
                        file: info.file.clone(),
                        line_number: i + 1,
                        line: line.to_string(),
                    }),
            );
        }
        Ok(scan)
    }

    async fn snapshot_content(&self, file: &str, index: usize) -> SandboxResult<String> {
        let target = validate_path(&self.root, file).into_validated()?;
        let history = self.backups.list(&target.relative_path).await?;
        let meta = history.get(index).ok_or_else(|| SandboxError::NoBackup {
            file: target.relative_path.clone(),
            index,
        })?;
        let bytes = self.backups.read(meta).await?;
        decode(bytes).map_err(|e| Self::io_error(&target.relative_path, e))
    }

    // -- audit -------------------------------------------------------------

    /// Append the one audit entry for this call and hand back `result`.
    ///
    /// A refusal is returned even if its audit append fails; a success whose
    /// audit append fails is reported as an audit error.
    async fn finish<T>(
        &self,
        operation: Operation,
        user_id: &str,
        file: &str,
        result: SandboxResult<T>,
        describe: impl FnOnce(&T, AuditLogEntry) -> AuditLogEntry,
    ) -> SandboxResult<T> {
        let now = self.clock.now();
        match result {
            Ok(value) => {
                let entry = describe(&value, AuditLogEntry::success(now, user_id, operation, file));
                self.audit.append(entry).await?;
                obs::emit_sandbox_allowed(operation, user_id, file);
                Ok(value)
            }
            Err(err) => {
                obs::emit_sandbox_refused(operation, user_id, file, &err);
                let entry = AuditLogEntry::failure(now, user_id, operation, file, &err);
                if let Err(audit_err) = self.audit.append(entry).await {
                    obs::emit_audit_append_failed(operation, file, &audit_err);
                }
                Err(err)
            }
        }
    }
}

fn describe_write(outcome: &WriteOutcome, entry: AuditLogEntry) -> AuditLogEntry {
    let mut entry = entry
        .with_content_hash(outcome.content_hash.clone())
        .with_metadata("bytes", json!(outcome.bytes));
    if let Some(backup) = &outcome.backup {
        entry = entry.with_metadata("backup_path", json!(backup.backup_path));
    }
    if !outcome.warnings.is_empty() {
        entry = entry.with_metadata("warnings", json!(outcome.warnings));
    }
    entry
}
