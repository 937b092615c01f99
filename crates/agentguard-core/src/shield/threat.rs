//! Threat catalog types: severity, action, scope, match rule, entry.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ShieldError;

/// Below this confidence a declared action is downgraded to
/// [`ShieldAction::RequireApproval`], except for critical blocks.
pub const CONFIDENCE_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl FromStr for Severity {
    type Err = ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(ShieldError::UnknownSeverity(s.to_string())),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// What the agent loop does with an event.
///
/// Variants are declared weakest first, so the derived `Ord` is the
/// strength order `Log < RequireApproval < Block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShieldAction {
    /// Execute and record.
    Log,
    /// Pause for explicit user confirmation.
    RequireApproval,
    /// Do not execute.
    Block,
}

impl ShieldAction {
    pub fn strength(&self) -> u8 {
        match self {
            ShieldAction::Log => 0,
            ShieldAction::RequireApproval => 1,
            ShieldAction::Block => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShieldAction::Log => "log",
            ShieldAction::RequireApproval => "require_approval",
            ShieldAction::Block => "block",
        }
    }
}

impl FromStr for ShieldAction {
    type Err = ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" => Ok(ShieldAction::Log),
            "require_approval" => Ok(ShieldAction::RequireApproval),
            "block" => Ok(ShieldAction::Block),
            _ => Err(ShieldError::UnknownAction(s.to_string())),
        }
    }
}

impl std::fmt::Display for ShieldAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Kind of runtime action an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventScope {
    #[serde(rename = "prompt")]
    Prompt,
    #[serde(rename = "skill.install")]
    SkillInstall,
    #[serde(rename = "skill.execute")]
    SkillExecute,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "network.egress")]
    NetworkEgress,
    #[serde(rename = "secrets.read")]
    SecretsRead,
    #[serde(rename = "mcp")]
    Mcp,
}

impl EventScope {
    pub const ALL: [EventScope; 7] = [
        EventScope::Prompt,
        EventScope::SkillInstall,
        EventScope::SkillExecute,
        EventScope::ToolCall,
        EventScope::NetworkEgress,
        EventScope::SecretsRead,
        EventScope::Mcp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventScope::Prompt => "prompt",
            EventScope::SkillInstall => "skill.install",
            EventScope::SkillExecute => "skill.execute",
            EventScope::ToolCall => "tool.call",
            EventScope::NetworkEgress => "network.egress",
            EventScope::SecretsRead => "secrets.read",
            EventScope::Mcp => "mcp",
        }
    }
}

impl FromStr for EventScope {
    type Err = ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EventScope::ALL
            .into_iter()
            .find(|scope| scope.as_str() == wanted)
            .ok_or_else(|| ShieldError::UnknownScope(s.to_string()))
    }
}

impl std::fmt::Display for EventScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Which event field a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchKind {
    #[serde(rename = "keyword")]
    Keyword,
    #[serde(rename = "tool.name")]
    ToolName,
    #[serde(rename = "skill.name")]
    SkillName,
    #[serde(rename = "domain")]
    Domain,
    #[serde(rename = "url")]
    Url,
    #[serde(rename = "file.path")]
    FilePath,
    #[serde(rename = "secret.path")]
    SecretPath,
}

impl MatchKind {
    pub const ALL: [MatchKind; 7] = [
        MatchKind::Keyword,
        MatchKind::ToolName,
        MatchKind::SkillName,
        MatchKind::Domain,
        MatchKind::Url,
        MatchKind::FilePath,
        MatchKind::SecretPath,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Keyword => "keyword",
            MatchKind::ToolName => "tool.name",
            MatchKind::SkillName => "skill.name",
            MatchKind::Domain => "domain",
            MatchKind::Url => "url",
            MatchKind::FilePath => "file.path",
            MatchKind::SecretPath => "secret.path",
        }
    }
}

impl FromStr for MatchKind {
    type Err = ShieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        MatchKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ShieldError::UnknownMatchKind(s.to_string()))
    }
}

impl std::fmt::Display for MatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRule {
    pub kind: MatchKind,
    pub value: String,
}

/// A match rule plus the action to take when it fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub rule: MatchRule,
    pub action: ShieldAction,
}

/// One declared threat. Built only through the catalog parser, so
/// `confidence` is always within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatEntry {
    pub id: String,
    pub title: String,
    pub severity: Severity,
    pub confidence: f64,
    pub fingerprint: String,
    /// Empty means every scope.
    pub scopes: Vec<EventScope>,
    pub directive: Directive,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl ThreatEntry {
    pub fn applies_to(&self, scope: EventScope) -> bool {
        self.scopes.is_empty() || self.scopes.contains(&scope)
    }

    /// Declared action after the confidence rule: below
    /// [`CONFIDENCE_THRESHOLD`] the action becomes `require_approval`,
    /// unless this is a critical block.
    pub fn effective_action(&self) -> ShieldAction {
        let declared = self.directive.action;
        let critical_block = self.severity == Severity::Critical && declared == ShieldAction::Block;
        if self.confidence < CONFIDENCE_THRESHOLD && !critical_block {
            ShieldAction::RequireApproval
        } else {
            declared
        }
    }

    /// `"<title> (<severity>, confidence: <confidence>)"`
    pub fn reason(&self) -> String {
        format!(
            "{} ({}, confidence: {})",
            self.title, self.severity, self.confidence
        )
    }
}
