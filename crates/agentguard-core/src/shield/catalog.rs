//! Threat catalog parser.
//!
//! The policy is TOML with one `[[threat]]` table per entry. It may be a
//! bare TOML document or Markdown carrying the TOML in ```` ```toml ````
//! fences (the usual shape of `SHIELD.md`).
//!
//! Parsing is tolerant: a document that cannot be read yields an empty
//! catalog, and each bad entry is skipped and reported in
//! [`CatalogParse::rejected`].

use std::collections::HashSet;

use serde::Deserialize;

use super::error::{ShieldError, ShieldResult};
use super::threat::{Directive, EventScope, MatchKind, MatchRule, Severity, ShieldAction, ThreatEntry};
use crate::digest::sha256_hex;

/// One `[[threat]]` table as written, before validation.
#[derive(Debug, Default, Deserialize)]
pub struct RawThreat {
    pub id: Option<String>,
    pub title: Option<String>,
    pub severity: Option<String>,
    pub confidence: Option<f64>,
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub action: Option<String>,
    pub matched_on: Option<String>,
    pub match_value: Option<String>,
    pub recommendation: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> ShieldResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ShieldError::MissingField { field })
}

impl TryFrom<RawThreat> for ThreatEntry {
    type Error = ShieldError;

    fn try_from(raw: RawThreat) -> Result<Self, Self::Error> {
        let id = required(raw.id, "id")?;
        let title = raw
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| id.clone());
        let severity: Severity = required(raw.severity, "severity")?.parse()?;

        let confidence = raw
            .confidence
            .ok_or(ShieldError::MissingField { field: "confidence" })?;
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ShieldError::ConfidenceOutOfRange {
                id,
                value: confidence,
            });
        }

        let action: ShieldAction = required(raw.action, "action")?.parse()?;
        let kind: MatchKind = required(raw.matched_on, "matched_on")?.parse()?;
        let value = raw.match_value.unwrap_or_default();
        if value.trim().is_empty() {
            return Err(ShieldError::EmptyMatchValue { id });
        }

        let scopes = raw
            .scopes
            .iter()
            .map(|s| s.parse::<EventScope>())
            .collect::<ShieldResult<Vec<_>>>()?;

        let fingerprint = raw
            .fingerprint
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| derive_fingerprint(&id, &title, kind, &value));

        Ok(ThreatEntry {
            id,
            title,
            severity,
            confidence,
            fingerprint,
            scopes,
            directive: Directive {
                rule: MatchRule { kind, value },
                action,
            },
            recommendation: raw.recommendation,
        })
    }
}

/// `sha256:<hex>` over the fields that identify a threat.
pub fn derive_fingerprint(id: &str, title: &str, kind: MatchKind, value: &str) -> String {
    let material = format!("{id}\n{title}\n{kind}\n{value}");
    format!("sha256:{}", sha256_hex(material.as_bytes()))
}

/// An entry that failed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedThreat {
    /// 0-based position among the document's `[[threat]]` tables.
    pub index: usize,
    pub id: Option<String>,
    pub error: ShieldError,
}

/// Outcome of parsing a policy document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogParse {
    pub threats: Vec<ThreatEntry>,
    pub rejected: Vec<RejectedThreat>,
    /// Set when the document as a whole could not be read.
    pub document_error: Option<ShieldError>,
}

impl CatalogParse {
    fn unreadable(error: ShieldError) -> Self {
        Self {
            document_error: Some(error),
            ..Self::default()
        }
    }
}

/// The TOML to parse: the contents of every ```` ```toml ```` fence, or the
/// whole text when there are none.
fn policy_source(text: &str) -> String {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in text.lines() {
        let trimmed = line.trim();
        match current.as_mut() {
            None if trimmed.starts_with("```toml") => current = Some(Vec::new()),
            Some(_) if trimmed.starts_with("```") => {
                if let Some(block) = current.take() {
                    blocks.push(block.join("\n"));
                }
            }
            Some(block) => block.push(line),
            None => {}
        }
    }
    if blocks.is_empty() {
        text.to_string()
    } else {
        blocks.join("\n")
    }
}

/// Parse a policy document into threat entries, in document order.
pub fn parse_threat_catalog(text: &str) -> CatalogParse {
    let source = policy_source(text);
    if source.trim().is_empty() {
        return CatalogParse::default();
    }

    let document = match toml::from_str::<toml::Table>(&source) {
        Ok(document) => document,
        Err(e) => return CatalogParse::unreadable(ShieldError::Syntax(e.to_string())),
    };
    let tables = match document.get("threat") {
        None => return CatalogParse::default(),
        Some(toml::Value::Array(tables)) => tables,
        Some(_) => {
            return CatalogParse::unreadable(ShieldError::Malformed(
                "`threat` must be an array of tables".into(),
            ))
        }
    };

    let mut parse = CatalogParse::default();
    let mut seen = HashSet::new();
    for (index, value) in tables.iter().enumerate() {
        let id = value.get("id").and_then(|v| v.as_str()).map(str::to_string);
        let entry = value
            .clone()
            .try_into::<RawThreat>()
            .map_err(|e| ShieldError::Malformed(e.to_string()))
            .and_then(ThreatEntry::try_from)
            .and_then(|entry| {
                if seen.insert(entry.id.clone()) {
                    Ok(entry)
                } else {
                    Err(ShieldError::DuplicateId(entry.id))
                }
            });
        match entry {
            Ok(entry) => parse.threats.push(entry),
            Err(error) => parse.rejected.push(RejectedThreat { index, id, error }),
        }
    }
    parse
}
