//! Suspicious-content scanning and size limits for proposed file content.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::error::{SandboxError, SandboxResult};

/// Default maximum content size (1 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// What happens when a rule matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSeverity {
    /// Refuse the write.
    Block,
    /// Record a warning and allow.
    Warn,
}

/// One suspicious-content detector.
#[derive(Debug, Clone)]
pub struct ContentValidationRule {
    pub pattern: Regex,
    pub severity: RuleSeverity,
    pub description: String,
}

impl ContentValidationRule {
    /// Compile a case-insensitive, multi-line rule.
    pub fn new(
        pattern: &str,
        severity: RuleSeverity,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()?;
        Ok(Self {
            pattern,
            severity,
            description: description.into(),
        })
    }
}

/// Outcome of scanning content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentValidationResult {
    pub safe: bool,
    /// Descriptions of `warn` rules that matched, in rule order.
    pub warnings: Vec<String>,
    /// Description of the first `block` rule that matched.
    pub blocked_by: Option<String>,
}

const DEFAULT_RULES: &[(&str, RuleSeverity, &str)] = &[
    (
        r"ignore\s+(all\s+)?(previous|prior|above)\s+instructions",
        RuleSeverity::Block,
        "prompt injection: instruction override",
    ),
    (
        r"disregard\s+(all\s+)?(your|previous|prior)\s+(rules|instructions|guidelines)",
        RuleSeverity::Block,
        "prompt injection: rule disregard",
    ),
    (
        r"you\s+are\s+no\s+longer\s+bound\s+by",
        RuleSeverity::Block,
        "attempt to lift behavioural constraints",
    ),
    (r"<\s*script\b", RuleSeverity::Block, "embedded script tag"),
    (
        r"\b(curl|wget)\b[^|\n]*\|\s*(sudo\s+)?(ba|z|da)?sh\b",
        RuleSeverity::Block,
        "remote script piped to a shell",
    ),
    (
        r"\brm\s+-(rf|fr)\s+(/|~)(\s|$)",
        RuleSeverity::Block,
        "destructive filesystem command",
    ),
    (
        r"-----BEGIN\s+(RSA\s+|EC\s+|OPENSSH\s+|DSA\s+)?PRIVATE\s+KEY-----",
        RuleSeverity::Block,
        "private key material",
    ),
    (r"https?://", RuleSeverity::Warn, "contains an external URL"),
    (
        r"\b(api[_-]?key|secret|token|password)\s*[:=]",
        RuleSeverity::Warn,
        "possible credential assignment",
    ),
    (r"\beval\s*\(", RuleSeverity::Warn, "dynamic code evaluation"),
];

/// The built-in rule set, in evaluation order.
pub fn default_rules() -> Vec<ContentValidationRule> {
    DEFAULT_RULES
        .iter()
        .filter_map(|(pattern, severity, description)| {
            match ContentValidationRule::new(pattern, *severity, *description) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    tracing::error!(pattern = %pattern, error = %err, "built-in content rule failed to compile");
                    None
                }
            }
        })
        .collect()
}

/// Apply `rules` in order. The first matching `block` rule is terminal.
pub fn validate_content(content: &str, rules: &[ContentValidationRule]) -> ContentValidationResult {
    let mut warnings = Vec::new();
    for rule in rules {
        if !rule.pattern.is_match(content) {
            continue;
        }
        match rule.severity {
            RuleSeverity::Block => {
                return ContentValidationResult {
                    safe: false,
                    warnings,
                    blocked_by: Some(rule.description.clone()),
                };
            }
            RuleSeverity::Warn => warnings.push(rule.description.clone()),
        }
    }
    ContentValidationResult {
        safe: true,
        warnings,
        blocked_by: None,
    }
}

/// Reject content larger than `max` bytes.
pub fn validate_file_size(size: u64, max: u64) -> SandboxResult<()> {
    if size > max {
        return Err(SandboxError::FileSizeExceeded { size, max });
    }
    Ok(())
}

/// Size limit plus rule set, as applied to every write.
#[derive(Debug, Clone)]
pub struct ContentGuard {
    rules: Vec<ContentValidationRule>,
    max_size: u64,
}

impl ContentGuard {
    pub fn new(rules: Vec<ContentValidationRule>, max_size: u64) -> Self {
        Self { rules, max_size }
    }

    pub fn with_defaults(max_size: u64) -> Self {
        Self::new(default_rules(), max_size)
    }

    pub fn rules(&self) -> &[ContentValidationRule] {
        &self.rules
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Size check, then rule scan. Returns the collected warnings.
    pub fn check(&self, content: &str) -> SandboxResult<Vec<String>> {
        validate_file_size(content.len() as u64, self.max_size)?;
        let result = validate_content(content, &self.rules);
        match result.blocked_by {
            Some(reason) => Err(SandboxError::SuspiciousContent { reason }),
            None => Ok(result.warnings),
        }
    }
}
