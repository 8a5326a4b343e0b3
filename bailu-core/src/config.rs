//! Configuration
//!
//! Environment-first settings resolution with a per-user `config.json`
//! fallback, plus the optional advisory hints file a workspace may carry
//! at its root. Hint parsing failures degrade to empty hints; they never
//! abort startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::SafetyMode;

/// Environment variables the process reads.
pub mod env_vars {
    pub const API_KEY: &str = "API_KEY";
    pub const BASE_URL: &str = "BASE_URL";
    pub const MODEL_NAME: &str = "MODEL_NAME";
    pub const SAFETY_MODE: &str = "SAFETY_MODE";
    pub const CONFIG_DIR: &str = "CONFIG_DIR";
    pub const DEBUG: &str = "DEBUG";
}

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Name of the optional hints file at the workspace root.
pub const WORKSPACE_HINTS_FILE: &str = ".bailu.toml";

// ---------------------------------------------------------------------------
// Per-user config file
// ---------------------------------------------------------------------------

/// `<config-dir>/config.json`. Every field optional; the environment
/// takes precedence over this file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_mode: Option<String>,
}

impl UserConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config: {}", path.display()))
    }
}

/// Sample `config.json` for `bailu config init`.
pub fn sample_config() -> String {
    serde_json::to_string_pretty(&serde_json::json!({
        "model": DEFAULT_MODEL,
        "base_url": DEFAULT_BASE_URL,
        "safety_mode": "review",
    }))
    .expect("static sample serializes")
        + "\n"
}

// ---------------------------------------------------------------------------
// Resolved settings
// ---------------------------------------------------------------------------

/// Everything the binary needs, resolved from environment and config
/// file at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub safety_mode: SafetyMode,
    pub config_dir: PathBuf,
    pub debug: bool,
}

impl Settings {
    /// Resolve settings: environment first, then `config.json`, then
    /// built-in defaults.
    pub fn resolve() -> Result<Self> {
        let config_dir = config_dir()?;
        let file = match UserConfig::load(&config_dir.join("config.json")) {
            Ok(cfg) => {
                info!(dir = %config_dir.display(), "loaded config.json");
                cfg
            }
            Err(e) => {
                debug!(err = %e, "no usable config.json, using defaults");
                UserConfig::default()
            }
        };

        let safety_mode = std::env::var(env_vars::SAFETY_MODE)
            .ok()
            .or(file.safety_mode)
            .and_then(|s| SafetyMode::parse(&s))
            .unwrap_or(SafetyMode::Review);

        Ok(Self {
            api_key: std::env::var(env_vars::API_KEY).ok().filter(|k| !k.is_empty()),
            base_url: std::env::var(env_vars::BASE_URL)
                .ok()
                .or(file.base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: std::env::var(env_vars::MODEL_NAME)
                .ok()
                .or(file.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            safety_mode,
            config_dir,
            debug: std::env::var(env_vars::DEBUG).is_ok_and(|v| !v.is_empty() && v != "0"),
        })
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.config_dir.join("chat-sessions")
    }

    pub fn history_path(&self) -> PathBuf {
        self.config_dir.join("history.txt")
    }
}

/// The per-user config directory: `CONFIG_DIR` when set, the platform
/// config directory plus `bailu` otherwise.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(env_vars::CONFIG_DIR) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let base = dirs::config_dir().context("could not determine config directory")?;
    Ok(base.join("bailu"))
}

// ---------------------------------------------------------------------------
// Workspace hints
// ---------------------------------------------------------------------------

/// Advisory hints from `.bailu.toml` at the workspace root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceHints {
    /// How to run this project's tests.
    pub test_command: Option<String>,
    /// Paths worth reading before making changes.
    #[serde(default)]
    pub important_paths: Vec<String>,
}

impl WorkspaceHints {
    /// Read hints from the workspace root. Missing file or parse failure
    /// yields empty hints.
    pub fn load(workspace_root: &Path) -> Self {
        let path = workspace_root.join(WORKSPACE_HINTS_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(hints) => hints,
                Err(e) => {
                    debug!(path = %path.display(), err = %e, "unparsable workspace hints, ignoring");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Render as advisory lines for the system-prompt memory section.
    pub fn render(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(cmd) = &self.test_command {
            lines.push(format!("run tests with: {}", cmd));
        }
        for path in &self.important_paths {
            lines.push(format!("important path: {}", path));
        }
        lines
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
