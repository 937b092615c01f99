//! Event-to-threat matching.

use std::path::Path;

use super::event::{host_of, parse_url, url_host, ShieldEvent};
use super::threat::{Directive, MatchKind, MatchRule, ThreatEntry};

/// A threat whose rule fired for an event.
#[derive(Debug, Clone, PartialEq)]
pub struct ShieldMatch<'a> {
    pub threat: &'a ThreatEntry,
    pub directive: &'a Directive,
    pub matched_on: MatchKind,
    pub match_value: &'a str,
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn path_within(candidate: &str, prefix: &str) -> bool {
    Path::new(candidate.trim()).starts_with(Path::new(prefix.trim()))
}

/// Same origin as `prefix`, with a path (and query, if the rule has one)
/// that extends it. Both sides are normalized before comparing.
fn url_within(candidate: &str, prefix: &str) -> bool {
    let (Some(candidate), Some(prefix)) = (parse_url(candidate), parse_url(prefix)) else {
        return false;
    };
    candidate.scheme() == prefix.scheme()
        && url_host(&candidate) == url_host(&prefix)
        && candidate.port_or_known_default() == prefix.port_or_known_default()
        && candidate.path().starts_with(prefix.path())
        && match prefix.query() {
            Some(q) => candidate.query().is_some_and(|c| c.starts_with(q)),
            None => true,
        }
}

/// Whether `rule` fires for `event`. Rules whose field is absent never fire.
pub fn rule_matches(rule: &MatchRule, event: &ShieldEvent) -> bool {
    let value = rule.value.as_str();
    match rule.kind {
        MatchKind::Keyword => event
            .content
            .as_deref()
            .is_some_and(|c| c.to_lowercase().contains(&value.to_lowercase())),
        MatchKind::ToolName => event
            .tool_name
            .as_deref()
            .is_some_and(|n| eq_ignore_case(n.trim(), value.trim())),
        MatchKind::SkillName => event
            .skill_name
            .as_deref()
            .is_some_and(|n| eq_ignore_case(n.trim(), value.trim())),
        MatchKind::Domain => {
            let Some(wanted) = host_of(value.trim().trim_start_matches("*.")) else {
                return false;
            };
            event.host().is_some_and(|host| {
                host == wanted || host.ends_with(&format!(".{wanted}"))
            })
        }
        MatchKind::Url => event.url.as_deref().is_some_and(|u| url_within(u, value)),
        MatchKind::FilePath => event
            .file_path
            .as_deref()
            .is_some_and(|p| path_within(p, value)),
        MatchKind::SecretPath => event
            .secret_path
            .as_deref()
            .is_some_and(|p| path_within(p, value)),
    }
}

/// Every threat that applies to `event`, in catalog order.
pub fn match_event<'a>(event: &ShieldEvent, threats: &'a [ThreatEntry]) -> Vec<ShieldMatch<'a>> {
    threats
        .iter()
        .filter(|threat| threat.applies_to(event.scope))
        .filter(|threat| rule_matches(&threat.directive.rule, event))
        .map(|threat| ShieldMatch {
            threat,
            directive: &threat.directive,
            matched_on: threat.directive.rule.kind,
            match_value: &threat.directive.rule.value,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shield::threat::EventScope;

    fn rule(kind: MatchKind, value: &str) -> MatchRule {
        MatchRule {
            kind,
            value: value.into(),
        }
    }

    #[test]
    fn test_keyword_is_case_insensitive_substring() {
        let event = ShieldEvent::new(EventScope::ToolCall).with_content("sudo RM -RF /");
        assert!(rule_matches(&rule(MatchKind::Keyword, "rm -rf"), &event));
        assert!(!rule_matches(&rule(MatchKind::Keyword, "mkfs"), &event));
    }

    #[test]
    fn test_tool_name_is_exact_ignoring_case() {
        let event = ShieldEvent::new(EventScope::ToolCall).with_tool("Shell");
        assert!(rule_matches(&rule(MatchKind::ToolName, "shell"), &event));
        assert!(!rule_matches(&rule(MatchKind::ToolName, "she"), &event));
        assert!(!rule_matches(&rule(MatchKind::SkillName, "shell"), &event));
    }

    #[test]
    fn test_domain_matches_subdomains_only() {
        let r = rule(MatchKind::Domain, "evil.example");
        let hit = |host: &str| {
            rule_matches(&r, &ShieldEvent::new(EventScope::NetworkEgress).with_domain(host))
        };
        assert!(hit("evil.example"));
        assert!(hit("cdn.evil.example"));
        assert!(!hit("notevil.example"));
        assert!(!hit("evil.example.org"));
    }

    #[test]
    fn test_domain_rule_uses_url_host() {
        let event =
            ShieldEvent::new(EventScope::NetworkEgress).with_url("https://a.evil.example/x");
        assert!(rule_matches(&rule(MatchKind::Domain, "evil.example"), &event));
    }

    #[test]
    fn test_url_is_prefix() {
        let event = ShieldEvent::new(EventScope::NetworkEgress)
            .with_url("https://paste.example/raw/abc");
        assert!(rule_matches(&rule(MatchKind::Url, "https://paste.example/raw"), &event));
        assert!(!rule_matches(&rule(MatchKind::Url, "https://paste.example/api"), &event));
    }

    #[test]
    fn test_url_compares_normalized_forms() {
        let r = rule(MatchKind::Url, "https://paste.example/raw");
        let hit = |url: &str| {
            rule_matches(&r, &ShieldEvent::new(EventScope::NetworkEgress).with_url(url))
        };
        assert!(hit("HTTPS://PASTE.example/raw/x"));
        assert!(hit("https://paste.example:443/raw/x"));
        assert!(hit("https://paste.example./raw"));
        assert!(!hit("http://paste.example/raw/x"));
        assert!(!hit("https://paste.example:8443/raw/x"));
        assert!(!hit("https://paste.example.evil/raw/x"));
    }

    #[test]
    fn test_domain_rule_sees_the_host_a_client_would_dial() {
        let r = rule(MatchKind::Domain, "evil.example");
        for url in [r"https://evil.example\@good.com/", "https://evil.example%2e/"] {
            let event = ShieldEvent::new(EventScope::NetworkEgress).with_url(url);
            assert!(rule_matches(&r, &event), "{url}");
        }
        let event = ShieldEvent::new(EventScope::NetworkEgress)
            .with_url("https://good.com@evil.example/");
        assert!(rule_matches(&r, &event));
    }

    #[test]
    fn test_paths_match_by_component() {
        let event = ShieldEvent::new(EventScope::SecretsRead).with_secret_path("/home/u/.ssh/id_ed25519");
        assert!(rule_matches(&rule(MatchKind::SecretPath, "/home/u/.ssh"), &event));
        assert!(!rule_matches(&rule(MatchKind::SecretPath, "/home/u/.ss"), &event));

        let event = ShieldEvent::new(EventScope::ToolCall).with_file_path("/etc/passwd");
        assert!(rule_matches(&rule(MatchKind::FilePath, "/etc/passwd"), &event));
    }

    #[test]
    fn test_absent_field_never_matches() {
        let event = ShieldEvent::new(EventScope::Prompt);
        for kind in MatchKind::ALL {
            assert!(!rule_matches(&rule(kind, "x"), &event), "{kind}");
        }
    }
}
