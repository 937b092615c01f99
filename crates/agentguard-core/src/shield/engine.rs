//! Shield decision engine: one enforceable action per event.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::catalog::{parse_threat_catalog, CatalogParse};
use super::event::ShieldEvent;
use super::matcher::{match_event, ShieldMatch};
use super::threat::{EventScope, MatchKind, ShieldAction, ThreatEntry};
use crate::obs;

/// Reason carried by the default decision.
pub const NO_MATCH_REASON: &str = "No threat match — proceeding normally.";

/// The engine's verdict for one event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShieldDecision {
    pub action: ShieldAction,
    pub scope: EventScope,
    pub threat_id: Option<String>,
    pub fingerprint: Option<String>,
    pub matched_on: Option<MatchKind>,
    pub match_value: Option<String>,
    pub reason: String,
}

impl ShieldDecision {
    /// The permissive default: no threat matched.
    pub fn allow(scope: EventScope) -> Self {
        Self {
            action: ShieldAction::Log,
            scope,
            threat_id: None,
            fingerprint: None,
            matched_on: None,
            match_value: None,
            reason: NO_MATCH_REASON.to_string(),
        }
    }

    fn from_match(scope: EventScope, m: &ShieldMatch<'_>, action: ShieldAction) -> Self {
        Self {
            action,
            scope,
            threat_id: Some(m.threat.id.clone()),
            fingerprint: Some(m.threat.fingerprint.clone()),
            matched_on: Some(m.matched_on),
            match_value: Some(m.match_value.to_string()),
            reason: m.threat.reason(),
        }
    }

    /// `log`: run the action and record it.
    pub fn should_execute(&self) -> bool {
        self.action == ShieldAction::Log
    }

    /// `require_approval`: pause for explicit user confirmation.
    pub fn needs_approval(&self) -> bool {
        self.action == ShieldAction::RequireApproval
    }

    pub fn is_blocked(&self) -> bool {
        self.action == ShieldAction::Block
    }
}

/// Stateless evaluator over an immutable threat catalog.
///
/// Cloning shares the catalog. Safe to call from many tasks at once.
#[derive(Debug, Clone)]
pub struct ShieldEngine {
    threats: Arc<[ThreatEntry]>,
}

impl Default for ShieldEngine {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ShieldEngine {
    pub fn new(threats: Vec<ThreatEntry>) -> Self {
        Self {
            threats: threats.into(),
        }
    }

    /// Build from a parse result, logging what was skipped.
    pub fn from_catalog(parse: CatalogParse) -> Self {
        if let Some(error) = &parse.document_error {
            obs::emit_catalog_unreadable(error);
        }
        for rejected in &parse.rejected {
            obs::emit_catalog_entry_rejected(rejected.index, &rejected.error);
        }
        obs::emit_catalog_loaded(parse.threats.len(), parse.rejected.len());
        Self::new(parse.threats)
    }

    /// Read and parse the policy at `path`. A missing or unreadable file
    /// gives an empty, permissive engine.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => create_shield_engine(&text),
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    tracing::debug!(event = "shield.policy_missing", path = %path.display());
                } else {
                    tracing::warn!(
                        event = "shield.policy_unreadable",
                        path = %path.display(),
                        error = %e,
                    );
                }
                Self::default()
            }
        }
    }

    /// `true` if the catalog holds at least one threat.
    pub fn is_active(&self) -> bool {
        !self.threats.is_empty()
    }

    /// A copy of the catalog.
    pub fn threats(&self) -> Vec<ThreatEntry> {
        self.threats.to_vec()
    }

    pub fn len(&self) -> usize {
        self.threats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threats.is_empty()
    }

    /// Resolve `event` to one decision.
    ///
    /// Each match contributes its effective action (see
    /// [`ThreatEntry::effective_action`]); the strongest wins and ties go to
    /// the earliest match.
    pub fn evaluate(&self, event: &ShieldEvent) -> ShieldDecision {
        let matches = match_event(event, &self.threats);
        let strongest = matches
            .iter()
            .fold(None::<(&ShieldMatch<'_>, ShieldAction)>, |best, m| {
                let action = m.threat.effective_action();
                match best {
                    Some((b, best_action)) if best_action >= action => Some((b, best_action)),
                    _ => Some((m, action)),
                }
            });

        let decision = match strongest {
            Some((m, action)) => ShieldDecision::from_match(event.scope, m, action),
            None => ShieldDecision::allow(event.scope),
        };
        obs::emit_shield_decision(&decision);
        decision
    }
}

/// Parse `text` once and build an engine over it.
pub fn create_shield_engine(text: &str) -> ShieldEngine {
    ShieldEngine::from_catalog(parse_threat_catalog(text))
}
