//! Structured observability hooks for sandbox and shield events.
//!
//! Every hook emits one `tracing` event tagged with a stable `event` field
//! (`sandbox.allowed`, `sandbox.refused`, `shield.decision`, ...), so log
//! pipelines can filter without parsing messages. Verbosity follows
//! `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{error, info, warn};

use crate::audit::{AuditError, Operation};
use crate::backup::BackupMetadata;
use crate::sandbox::SandboxError;
use crate::shield::{ShieldDecision, ShieldError};

/// Span covering one sandbox operation. Attach with
/// [`tracing::Instrument::instrument`] so it survives `.await` points.
pub fn operation_span(operation: Operation, user_id: &str, file: &str) -> tracing::Span {
    tracing::info_span!(
        "agentguard.sandbox",
        operation = %operation,
        user_id = %user_id,
        file = %file,
    )
}

pub fn emit_sandbox_allowed(operation: Operation, user_id: &str, file: &str) {
    info!(
        event = "sandbox.allowed",
        operation = %operation,
        user_id = %user_id,
        file = %file,
    );
}

/// Emit event: operation refused (warning level).
pub fn emit_sandbox_refused(operation: Operation, user_id: &str, file: &str, error: &SandboxError) {
    let code = error.code().map(|c| c.as_str()).unwrap_or("NONE");
    warn!(
        event = "sandbox.refused",
        operation = %operation,
        user_id = %user_id,
        file = %file,
        code = code,
        retryable = error.is_retryable(),
        error = %error,
    );
}

pub fn emit_backup_created(meta: &BackupMetadata) {
    info!(
        event = "backup.created",
        file = %meta.original_file,
        backup_path = %meta.backup_path.display(),
        size = meta.size,
    );
}

/// Emit event: the audit trail rejected an entry for a refused operation.
pub fn emit_audit_append_failed(operation: Operation, file: &str, error: &AuditError) {
    error!(
        event = "audit.append_failed",
        operation = %operation,
        file = %file,
        error = %error,
    );
}

pub fn emit_shield_decision(decision: &ShieldDecision) {
    info!(
        event = "shield.decision",
        scope = %decision.scope,
        action = %decision.action,
        threat_id = decision.threat_id.as_deref().unwrap_or("-"),
        reason = %decision.reason,
    );
}

pub fn emit_catalog_loaded(threats: usize, rejected: usize) {
    info!(event = "shield.catalog_loaded", threats = threats, rejected = rejected);
}

/// Emit event: one threat entry was skipped (warning level).
pub fn emit_catalog_entry_rejected(index: usize, error: &ShieldError) {
    warn!(event = "shield.entry_rejected", index = index, error = %error);
}

/// Emit event: the policy document could not be parsed at all; the catalog
/// is empty and the shield is permissive.
pub fn emit_catalog_unreadable(error: &ShieldError) {
    warn!(event = "shield.catalog_unreadable", error = %error);
}
