//! agentguard core library
//!
//! Trust boundary for an autonomous agent: a sandbox over the agent's
//! self-configuration documents and a shield that gates its runtime actions
//! against a declarative threat policy.

pub mod audit;
pub mod backup;
pub mod clock;
pub mod config;
pub mod digest;
pub mod obs;
pub mod sandbox;
pub mod shield;
pub mod telemetry;

pub use audit::{
    verify_chain, AuditError, AuditLog, AuditLogEntry, AuditSink, ChainReport, FileAuditSink,
    MemoryAuditSink, Operation,
};
pub use backup::{BackupError, BackupMetadata, BackupStore, FsBackupStore, MemoryBackupStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError};
pub use sandbox::{
    AllowedFile, DeleteOutcome, ErrorCode, FileInfo, SandboxConfig, SandboxError, SandboxManager,
    SandboxResult, SearchMatch, WriteOutcome,
};
pub use shield::{
    create_shield_engine, parse_threat_catalog, EventScope, ShieldAction, ShieldDecision,
    ShieldEngine, ShieldError, ShieldEvent, ThreatEntry,
};
pub use telemetry::init_tracing;

/// agentguard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
