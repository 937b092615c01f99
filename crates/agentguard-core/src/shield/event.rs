//! Runtime events submitted to the Shield, and host extraction from them.

use serde::{Deserialize, Serialize};
use url::Url;

use super::threat::EventScope;

/// A runtime action the agent is about to take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldEvent {
    pub scope: EventScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_path: Option<String>,
    /// Free text: prompt, command line, skill body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ShieldEvent {
    pub fn new(scope: EventScope) -> Self {
        Self {
            scope,
            tool_name: None,
            skill_name: None,
            domain: None,
            url: None,
            file_path: None,
            secret_path: None,
            content: None,
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn with_skill(mut self, name: impl Into<String>) -> Self {
        self.skill_name = Some(name.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn with_secret_path(mut self, path: impl Into<String>) -> Self {
        self.secret_path = Some(path.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Lowercased host: `domain` if set, otherwise taken from `url`.
    pub fn host(&self) -> Option<String> {
        match &self.domain {
            Some(domain) => host_of(domain),
            None => self.url.as_deref().and_then(host_of),
        }
    }
}

/// Parse `raw` the way an HTTP client would, assuming `https` for a bare
/// host. Relative references have no host and yield `None`.
pub(crate) fn parse_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') {
        return None;
    }
    match Url::parse(trimmed) {
        Ok(url) if url.has_host() => Some(url),
        _ if !trimmed.contains("://") => Url::parse(&format!("https://{trimmed}")).ok(),
        _ => None,
    }
}

/// Decoded, lowercased host of `url` without its trailing root dot.
pub(crate) fn url_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.trim_end_matches('.');
    (!host.is_empty()).then(|| host.to_ascii_lowercase())
}

/// Host of a URL or bare domain.
pub(crate) fn host_of(raw: &str) -> Option<String> {
    parse_url(raw).as_ref().and_then(url_host)
}
