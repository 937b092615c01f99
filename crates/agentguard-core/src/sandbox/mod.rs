//! Sandbox: guarded access to the agent's self-configuration documents.
//!
//! Every operation passes a fixed pipeline and fails closed at the first
//! rejection: path validation, immutability, per-user rate limiting,
//! content scanning, backup of prior content, atomic I/O, audit. Refusals
//! are audited just like successes.
//!
//! # Modules
//!
//! - [`files`]: `AllowedFile` (closed set of document names)
//! - [`path_guard`]: `validate_path()` (traversal and symlink containment)
//! - [`content_guard`]: `ContentGuard`, default suspicious-content rules
//! - [`rate_limit`]: sliding-window `RateLimiter`
//! - [`manager`]: `SandboxManager`, `SandboxConfig`
//! - [`error`]: `SandboxError` / `SandboxResult`, `ErrorCode`

pub mod content_guard;
pub mod error;
pub mod files;
pub mod manager;
pub mod path_guard;
pub mod rate_limit;

pub use content_guard::{
    default_rules, validate_content, validate_file_size, ContentGuard, ContentValidationResult,
    ContentValidationRule, RuleSeverity, DEFAULT_MAX_FILE_SIZE,
};
pub use error::{ErrorCode, SandboxError, SandboxResult};
pub use files::{is_allowed_file, is_immutable_file, AllowedFile};
pub use manager::{
    DeleteOutcome, FileInfo, SandboxConfig, SandboxManager, SearchMatch, WriteOutcome, ALL_FILES,
};
pub use path_guard::{validate_path, PathValidationResult, ValidatedPath};
pub use rate_limit::{RateLimitConfig, RateLimiter};
