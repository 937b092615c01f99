//! The closed set of self-configuration documents the agent may touch.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// One of the fixed self-configuration documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AllowedFile {
    #[serde(rename = "SOUL.md")]
    Soul,
    #[serde(rename = "IDENTITY.md")]
    Identity,
    #[serde(rename = "USER.md")]
    User,
    #[serde(rename = "AGENTS.md")]
    Agents,
    #[serde(rename = "TOOLS.md")]
    Tools,
    #[serde(rename = "MEMORY.md")]
    Memory,
    #[serde(rename = "HEARTBEAT.md")]
    Heartbeat,
    #[serde(rename = "SHIELD.md")]
    Shield,
}

impl AllowedFile {
    pub const ALL: [AllowedFile; 8] = [
        AllowedFile::Soul,
        AllowedFile::Identity,
        AllowedFile::User,
        AllowedFile::Agents,
        AllowedFile::Tools,
        AllowedFile::Memory,
        AllowedFile::Heartbeat,
        AllowedFile::Shield,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AllowedFile::Soul => "SOUL.md",
            AllowedFile::Identity => "IDENTITY.md",
            AllowedFile::User => "USER.md",
            AllowedFile::Agents => "AGENTS.md",
            AllowedFile::Tools => "TOOLS.md",
            AllowedFile::Memory => "MEMORY.md",
            AllowedFile::Heartbeat => "HEARTBEAT.md",
            AllowedFile::Shield => "SHIELD.md",
        }
    }

    /// Exact, case-sensitive lookup by file name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Identity and threat policy are read-only to the agent.
    pub fn is_immutable(&self) -> bool {
        matches!(self, AllowedFile::Identity | AllowedFile::Shield)
    }
}

impl std::fmt::Display for AllowedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn basename(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(name)
}

/// `true` if the final component of `name` is an allowed document.
pub fn is_allowed_file(name: &str) -> bool {
    AllowedFile::from_name(basename(name)).is_some()
}

/// `true` if the final component of `name` is an immutable document.
pub fn is_immutable_file(name: &str) -> bool {
    AllowedFile::from_name(basename(name)).is_some_and(|f| f.is_immutable())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for file in AllowedFile::ALL {
            assert_eq!(AllowedFile::from_name(file.name()), Some(file));
        }
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert!(is_allowed_file("SOUL.md"));
        assert!(!is_allowed_file("soul.md"));
        assert!(!is_allowed_file("SOUL.MD"));
        assert!(!is_allowed_file("config.toml"));
        assert!(!is_allowed_file(""));
    }

    #[test]
    fn test_immutable_subset() {
        let immutable: Vec<_> = AllowedFile::ALL
            .into_iter()
            .filter(|f| f.is_immutable())
            .collect();
        assert_eq!(immutable, vec![AllowedFile::Identity, AllowedFile::Shield]);
        assert!(is_immutable_file("IDENTITY.md"));
        assert!(is_immutable_file("nested/SHIELD.md"));
        assert!(!is_immutable_file("SOUL.md"));
        assert!(!is_immutable_file("passwd"));
    }

    #[test]
    fn test_serde_uses_file_names() {
        let json = serde_json::to_string(&AllowedFile::Heartbeat).unwrap();
        assert_eq!(json, "\"HEARTBEAT.md\"");
    }
}
