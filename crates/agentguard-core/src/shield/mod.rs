//! Shield: declarative threat policy gating the agent's runtime actions.
//!
//! The policy is parsed once into an immutable catalog. Each event is
//! matched against it and resolved to `log`, `require_approval` or `block`.
//! A missing or broken policy degrades to an empty catalog that always logs.
//!
//! # Modules
//!
//! - [`threat`]: `ThreatEntry`, `Severity`, `ShieldAction`, `EventScope`, `MatchKind`
//! - [`catalog`]: `parse_threat_catalog()` (TOML, tolerant per entry)
//! - [`event`]: `ShieldEvent`
//! - [`matcher`]: `match_event()`
//! - [`engine`]: `ShieldEngine`, `ShieldDecision`, `create_shield_engine()`
//! - [`error`]: `ShieldError`

pub mod catalog;
pub mod engine;
pub mod error;
pub mod event;
pub mod matcher;
pub mod threat;

pub use catalog::{parse_threat_catalog, CatalogParse, RawThreat, RejectedThreat};
pub use engine::{create_shield_engine, ShieldDecision, ShieldEngine, NO_MATCH_REASON};
pub use error::{ShieldError, ShieldResult};
pub use event::ShieldEvent;
pub use matcher::{match_event, ShieldMatch};
pub use threat::{
    Directive, EventScope, MatchKind, MatchRule, Severity, ShieldAction, ThreatEntry,
    CONFIDENCE_THRESHOLD,
};
