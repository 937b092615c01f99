//! Error types for the shield module.

use thiserror::Error;

/// Why a policy document or one of its threat entries was rejected.
///
/// None of these halt the agent: a rejected document yields an empty
/// catalog and a rejected entry is skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ShieldError {
    #[error("policy document is not valid TOML: {0}")]
    Syntax(String),

    #[error("policy document is malformed: {0}")]
    Malformed(String),

    #[error("threat entry is missing `{field}`")]
    MissingField { field: &'static str },

    #[error("threat {id}: confidence {value} is outside [0, 1]")]
    ConfidenceOutOfRange { id: String, value: f64 },

    #[error("unknown severity `{0}`")]
    UnknownSeverity(String),

    #[error("unknown action `{0}`")]
    UnknownAction(String),

    #[error("unknown match kind `{0}`")]
    UnknownMatchKind(String),

    #[error("unknown event scope `{0}`")]
    UnknownScope(String),

    #[error("threat {id}: match_value is empty")]
    EmptyMatchValue { id: String },

    #[error("duplicate threat id `{0}`")]
    DuplicateId(String),
}

pub type ShieldResult<T> = std::result::Result<T, ShieldError>;
