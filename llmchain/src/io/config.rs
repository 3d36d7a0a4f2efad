//! Global configuration stored in `<base>/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Defaults applied to every agent invocation (TOML).
///
/// Missing fields default to the values below; a missing file yields
/// `GlobalConfig::default()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Model used by links that do not name one.
    pub default_model: String,

    /// Model the agent CLI may fall back to when the primary is overloaded.
    pub fallback_model: Option<String>,

    /// Value for `--permission-mode`.
    pub default_permission_mode: String,

    /// Tools passed via `--allowedTools`.
    pub default_allowed_tools: Vec<String>,

    /// Per-invocation wall-clock budget in seconds.
    pub default_timeout_seconds: u64,

    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-6".to_string(),
            fallback_model: None,
            default_permission_mode: "dontAsk".to_string(),
            default_allowed_tools: ["Read", "Write", "Edit", "Bash", "Glob", "Grep"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            default_timeout_seconds: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl GlobalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_model.trim().is_empty() {
            return Err(anyhow!("default_model must not be empty"));
        }
        if self.default_timeout_seconds == 0 {
            return Err(anyhow!("default_timeout_seconds must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `GlobalConfig::default()`.
pub fn load_config(path: &Path) -> Result<GlobalConfig> {
    if !path.exists() {
        let cfg = GlobalConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: GlobalConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &GlobalConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
