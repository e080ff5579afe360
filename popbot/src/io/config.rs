//! Bot configuration stored in `popbot.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::RunConfig;

/// Bot configuration (TOML).
///
/// Edited by humans. Missing fields fall back to the stock popcat.click
/// settings; the file itself must exist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BotConfig {
    /// Clicks per batch.
    pub batch_size: u64,

    /// Delay between batches in milliseconds.
    pub interval_ms: u64,

    /// Country code; used as the stats key and the `country` cookie.
    pub category: String,

    /// Stop after this many confirmed clicks. Omit for no limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_total: Option<u64>,

    /// Persist per-category counters to `stats_path`.
    pub stats_enabled: bool,

    /// Stats file, relative to the config file's directory.
    pub stats_path: PathBuf,

    pub target: TargetConfig,

    pub driver: DriverConfig,
}

/// Page and endpoint the bot interacts with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    pub page_url: String,
    pub click_selector: String,
    /// Substring of the URL that confirms a batch.
    pub confirm_url: String,
    pub confirm_status: u16,
    pub confirm_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DriverConfig {
    /// Command that starts the page driver (e.g. `["node","driver.js"]`).
    pub command: Vec<String>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            page_url: "https://popcat.click/".to_string(),
            click_selector: "div.cat-img".to_string(),
            confirm_url: "https://stats.popcat.click/pop".to_string(),
            confirm_status: 201,
            confirm_method: "POST".to_string(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            command: vec!["node".to_string(), "driver.js".to_string()],
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            batch_size: 800,
            interval_ms: 30_000,
            category: "PH".to_string(),
            max_total: None,
            stats_enabled: true,
            stats_path: PathBuf::from("stats.json"),
            target: TargetConfig::default(),
            driver: DriverConfig::default(),
        }
    }
}

impl BotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(anyhow!("batch_size must be > 0"));
        }
        if self.interval_ms == 0 {
            return Err(anyhow!("interval_ms must be > 0"));
        }
        if self.category.trim().is_empty() {
            return Err(anyhow!("category must be non-empty"));
        }
        if self.max_total == Some(0) {
            return Err(anyhow!("max_total must be > 0 when set"));
        }
        if self.target.page_url.trim().is_empty() {
            return Err(anyhow!("target.page_url must be non-empty"));
        }
        if self.target.confirm_url.trim().is_empty() {
            return Err(anyhow!("target.confirm_url must be non-empty"));
        }
        if self.driver.command.is_empty() || self.driver.command[0].trim().is_empty() {
            return Err(anyhow!("driver.command must be a non-empty array"));
        }
        Ok(())
    }

    /// Scheduling parameters for the lifecycle controller.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            batch_size: self.batch_size,
            interval: Duration::from_millis(self.interval_ms),
            category: self.category.clone(),
            max_total: self.max_total,
        }
    }

    /// Resolve `stats_path` against the directory holding the config file.
    pub fn resolved_stats_path(&self, config_path: &Path) -> PathBuf {
        if self.stats_path.is_absolute() {
            return self.stats_path.clone();
        }
        match config_path.parent() {
            Some(dir) => dir.join(&self.stats_path),
            None => self.stats_path.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// Unlike most optional files, a missing config is an error: the bot must not
/// start clicking with settings nobody wrote down.
pub fn load_config(path: &Path) -> Result<BotConfig> {
    debug!(path = %path.display(), "loading config");
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &BotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
