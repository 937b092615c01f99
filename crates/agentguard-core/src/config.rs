//! Application configuration loaded from TOML.
//!
//! ```toml
//! [agent]
//! user_id = "agent"
//!
//! [sandbox]
//! root = "workspace"
//! max_file_size = 1048576
//! io_timeout_ms = 5000
//!
//! [rate_limit]
//! max = 10
//! window_ms = 60000
//!
//! [audit]
//! path = ".agentguard/audit.jsonl"
//!
//! [backup]
//! dir = ".agentguard/backups"
//!
//! [shield]
//! policy_path = "workspace/SHIELD.md"   # default: <sandbox.root>/SHIELD.md
//! ```
//!
//! Every section and key is optional. Relative paths in a loaded file are
//! resolved against the file's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sandbox::content_guard::DEFAULT_MAX_FILE_SIZE;
use crate::sandbox::files::AllowedFile;
use crate::sandbox::manager::SandboxConfig;
use crate::sandbox::rate_limit::RateLimitConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Identity used for rate limiting and audit entries.
    pub user_id: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            user_id: "agent".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub root: PathBuf,
    pub max_file_size: u64,
    pub io_timeout_ms: u64,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("workspace"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            io_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSection {
    /// JSONL audit trail. Must lie outside the sandbox root.
    pub path: PathBuf,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".agentguard/audit.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSection {
    pub dir: PathBuf,
}

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".agentguard/backups"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub sandbox: SandboxSection,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditSection,
    pub backup: BackupSection,
    pub shield: ShieldSection,
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(event = "config.defaults", path = %path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::ReadFailed {
                    path: path.into(),
                    source,
                })
            }
        };
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::ParseFailed {
            path: path.into(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.resolved_against(base))
    }

    /// Parse without touching the filesystem. Paths are kept as written.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn resolved_against(mut self, base: &Path) -> Self {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.sandbox.root);
        resolve(&mut self.audit.path);
        resolve(&mut self.backup.dir);
        if let Some(policy) = self.shield.policy_path.as_mut() {
            resolve(policy);
        }
        self
    }

    /// Read any value by dot notation, e.g. `sandbox.root` or `rate_limit.max`.
    pub fn get(&self, key: &str) -> ConfigResult<toml::Value> {
        if key == "shield.policy_path" {
            return Ok(toml::Value::String(self.policy_path().display().to_string()));
        }
        let mut value = toml::Value::try_from(self)?;
        for segment in key.split('.') {
            value = match value {
                toml::Value::Table(mut table) => table
                    .remove(segment)
                    .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?,
                _ => return Err(ConfigError::UnknownKey(key.to_string())),
            };
        }
        Ok(value)
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            root: self.sandbox.root.clone(),
            max_file_size: self.sandbox.max_file_size,
            io_timeout_ms: self.sandbox.io_timeout_ms,
            rate_limit: self.rate_limit,
        }
    }

    /// Shield policy location, `<sandbox.root>/SHIELD.md` unless overridden.
    pub fn policy_path(&self) -> PathBuf {
        self.shield
            .policy_path
            .clone()
            .unwrap_or_else(|| self.sandbox.root.join(AllowedFile::Shield.name()))
    }
}
