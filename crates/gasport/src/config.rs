//! Server configuration: one JSON file under the user config directory.
//!
//! Environment variables win over the file (`MCP_GAS_PROJECTS_ROOT`,
//! `MCP_GAS_WORKSPACE`, `MCP_GAS_WORKING_DIR`, `MCP_GAS_VERBOSE_LOGGING`).
//! Writes are atomic: serialized to a sibling temp file and renamed over
//! the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::mirror::LocalMirror;
use crate::shim;

/// Default ceiling for inline response payloads (bytes). Larger payloads
/// spill to a scratch file referenced from the response.
pub const DEFAULT_INLINE_RESPONSE_LIMIT: usize = 8 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Local projects root; None resolves via the environment and fallbacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects_root: Option<PathBuf>,

    /// Optional persisted token material for headless operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Per-request debug dumps to the project event log.
    #[serde(default)]
    pub verbose_logging: bool,

    /// Time zone written into fresh manifests.
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// Inline response ceiling in bytes.
    #[serde(default = "default_inline_limit")]
    pub inline_response_limit: usize,
}

fn default_time_zone() -> String {
    shim::DEFAULT_TIME_ZONE.to_string()
}

fn default_inline_limit() -> usize {
    DEFAULT_INLINE_RESPONSE_LIMIT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            projects_root: None,
            auth_token: None,
            verbose_logging: false,
            time_zone: default_time_zone(),
            inline_response_limit: default_inline_limit(),
        }
    }
}

impl ServerConfig {
    /// The config file location under the user config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mcp-gas")
            .join("config.json")
    }

    /// Load the default config file; a missing file is the default config.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config JSON {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Atomic write: temp file next to the target, then rename.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path has no parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config dir {}", parent.display()))?;

        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("failed to create temp config {}", tmp.display()))?;
            let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;
            file.write_all(json.as_bytes())
                .context("failed to write config")?;
            file.sync_all().context("failed to sync config")?;
        }
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move config into place at {}", path.display()))?;
        Ok(())
    }

    /// The effective projects root after environment overrides.
    pub fn effective_projects_root(&self) -> PathBuf {
        LocalMirror::resolve_root(self.projects_root.as_deref())
    }

    /// Whether verbose per-request logging is on, environment winning.
    pub fn verbose_logging_enabled(&self) -> bool {
        match std::env::var("MCP_GAS_VERBOSE_LOGGING") {
            Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            Err(_) => self.verbose_logging,
        }
    }
}
