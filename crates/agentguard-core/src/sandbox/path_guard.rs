//! Path validation: confine requests to allowed documents under the root.
//!
//! Layers, in order: empty/NUL rejection → lexical `.`/`..` resolution →
//! root containment → symlink containment (nearest existing ancestor is
//! canonicalized) → basename membership in [`AllowedFile`] → the document
//! sits directly in the root.

use std::path::{Component, Path, PathBuf};

use super::error::SandboxError;
use super::files::AllowedFile;

/// Outcome of validating a requested path.
#[derive(Debug)]
pub struct PathValidationResult {
    pub safe: bool,
    /// Absolute, lexically resolved location.
    pub resolved: PathBuf,
    /// `resolved` relative to the root, `/`-separated.
    pub relative_path: String,
    pub file: Option<AllowedFile>,
    pub error: Option<SandboxError>,
}

/// A path that passed every layer of [`validate_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPath {
    pub resolved: PathBuf,
    pub relative_path: String,
    pub file: AllowedFile,
}

impl PathValidationResult {
    fn rejected(resolved: PathBuf, error: SandboxError) -> Self {
        Self {
            safe: false,
            resolved,
            relative_path: String::new(),
            file: None,
            error: Some(error),
        }
    }

    /// Convert into a `Result`, failing closed if anything is missing.
    pub fn into_validated(self) -> Result<ValidatedPath, SandboxError> {
        match (self.safe, self.file, self.error) {
            (_, _, Some(err)) => Err(err),
            (true, Some(file), None) => Ok(ValidatedPath {
                resolved: self.resolved,
                relative_path: self.relative_path,
                file,
            }),
            _ => Err(SandboxError::PathTraversal {
                path: self.resolved.display().to_string(),
            }),
        }
    }
}

/// Resolve `.` and `..` without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                out.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
        }
    }
    out
}

/// Canonicalize the deepest existing ancestor of `path` (inclusive).
pub(crate) fn canonical_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors().find_map(|p| p.canonicalize().ok())
}

/// Validate `requested` against `root`.
///
/// `safe` holds iff the resolved path is a direct child of `root` (also after
/// following symlinks) named after an [`AllowedFile`]. Documents never live
/// in subdirectories, so `notes/SOUL.md` is an invalid file even when
/// `notes` is inside the root.
pub fn validate_path(root: &Path, requested: &str) -> PathValidationResult {
    let root_abs = if root.is_absolute() {
        normalize(root)
    } else {
        match std::env::current_dir() {
            Ok(cwd) => normalize(&cwd.join(root)),
            Err(_) => normalize(root),
        }
    };

    if requested.is_empty() || requested.contains('\0') {
        return PathValidationResult::rejected(
            root_abs,
            SandboxError::InvalidFile {
                name: requested.replace('\0', "\\0"),
            },
        );
    }

    let resolved = normalize(&root_abs.join(requested));
    if !resolved.starts_with(&root_abs) {
        return PathValidationResult::rejected(
            resolved,
            SandboxError::PathTraversal {
                path: requested.to_string(),
            },
        );
    }
    if resolved == root_abs {
        return PathValidationResult::rejected(
            resolved,
            SandboxError::InvalidFile {
                name: requested.to_string(),
            },
        );
    }

    // Symlinks: whatever exists along the way must stay under the real root.
    let canonical_root = root_abs.canonicalize().unwrap_or_else(|_| root_abs.clone());
    match canonical_ancestor(&resolved) {
        Some(real) if real.starts_with(&canonical_root) => {}
        _ => {
            return PathValidationResult::rejected(
                resolved,
                SandboxError::PathTraversal {
                    path: requested.to_string(),
                },
            )
        }
    }

    let Some(file) = resolved
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(AllowedFile::from_name)
    else {
        return PathValidationResult::rejected(
            resolved,
            SandboxError::InvalidFile {
                name: requested.to_string(),
            },
        );
    };

    if resolved.parent() != Some(root_abs.as_path()) {
        return PathValidationResult::rejected(
            resolved,
            SandboxError::InvalidFile {
                name: requested.to_string(),
            },
        );
    }
    let relative_path = file.name().to_string();

    PathValidationResult {
        safe: true,
        resolved,
        relative_path,
        file: Some(file),
        error: None,
    }
}
