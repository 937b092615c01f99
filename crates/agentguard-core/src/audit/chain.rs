//! Hash-chain computation and verification.
//!
//! `entry[i].previous_hash == entry_hash(entry[i-1])` for every `i > 0` and
//! `entry[0].previous_hash` is absent. Deleting, reordering or editing any
//! entry but the newest breaks the link after it. The newest entry is only
//! covered once [`ChainReport::head_hash`] is anchored somewhere else.

use serde::{Deserialize, Serialize};

use super::entry::AuditLogEntry;
use super::error::{AuditError, AuditResult};
use crate::digest::canonical_digest;

/// SHA-256 of the entry's canonical JSON, `previous_hash` included.
pub fn entry_hash(entry: &AuditLogEntry) -> AuditResult<String> {
    canonical_digest(entry).map_err(AuditError::from)
}

/// Summary of a successfully verified chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub entries: usize,
    pub head_hash: Option<String>,
}

/// Recompute the chain over `entries` and report the first broken link.
pub fn verify_chain(entries: &[AuditLogEntry]) -> AuditResult<ChainReport> {
    let mut expected: Option<String> = None;
    for (index, entry) in entries.iter().enumerate() {
        if entry.previous_hash != expected {
            return Err(AuditError::ChainBroken {
                index,
                expected,
                found: entry.previous_hash.clone(),
            });
        }
        expected = Some(entry_hash(entry)?);
    }
    Ok(ChainReport {
        entries: entries.len(),
        head_hash: expected,
    })
}
