//! Per-category counters persisted as JSON (`stats.json`).
//!
//! The file is a best-effort sidecar: a missing or corrupt file reads as empty
//! and write failures are logged, never returned to the run loop.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::BatchDelta;

/// Cumulative counters for one category.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategoryStats {
    #[serde(rename = "totalPopsSent", default)]
    pub total_sent: u64,
    #[serde(rename = "successfulPops", default)]
    pub succeeded: u64,
    #[serde(rename = "failedPops", default)]
    pub failed: u64,
    #[serde(rename = "firstPopTime", default)]
    pub first_event_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastPopTime", default)]
    pub last_event_at: Option<DateTime<Utc>>,
}

impl CategoryStats {
    /// Add `delta` and stamp event times.
    pub fn apply(&mut self, delta: BatchDelta, now: DateTime<Utc>) {
        self.total_sent = self.total_sent.saturating_add(delta.sent);
        self.succeeded = self.succeeded.saturating_add(delta.succeeded);
        self.failed = self.failed.saturating_add(delta.failed);
        if self.first_event_at.is_none() {
            self.first_event_at = Some(now);
        }
        self.last_event_at = Some(now);
    }
}

/// Stats keyed by category, ordered so the file stays stable between writes.
pub type StatsMap = BTreeMap<String, CategoryStats>;

/// Load-mutate-save store for [`StatsMap`].
#[derive(Debug, Clone)]
pub struct StatsStore {
    path: Option<PathBuf>,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    /// A store that reads nothing and writes nothing (`stats_enabled = false`).
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the whole mapping. Missing or unreadable files yield an empty map.
    pub fn load(&self) -> StatsMap {
        let Some(path) = &self.path else {
            return StatsMap::new();
        };
        if !path.exists() {
            debug!(path = %path.display(), "stats file missing, starting empty");
            return StatsMap::new();
        }
        match read_stats(path) {
            Ok(stats) => stats,
            Err(err) => {
                let error = format!("{err:#}");
                warn!(path = %path.display(), %error, "error loading stats file, starting with empty stats");
                StatsMap::new()
            }
        }
    }

    /// Atomically replace the file with `stats` (temp file + rename).
    pub fn save(&self, stats: &StatsMap) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut buf = serde_json::to_string_pretty(stats).context("serialize stats")?;
        buf.push('\n');
        write_atomic(path, &buf)
    }

    /// Add `delta` to `category`, creating the entry on first use.
    pub fn record_batch(&self, category: &str, delta: BatchDelta) {
        self.record_batch_at(category, delta, Utc::now());
    }

    pub fn record_batch_at(&self, category: &str, delta: BatchDelta, now: DateTime<Utc>) {
        if self.path.is_none() {
            return;
        }
        let mut stats = self.load();
        stats.entry(category.to_string()).or_default().apply(delta, now);
        match self.save(&stats) {
            Ok(()) => debug!(
                category,
                sent = delta.sent,
                failed = delta.failed,
                "stats recorded"
            ),
            Err(err) => {
                let error = format!("{err:#}");
                warn!(category, %error, "error saving stats");
            }
        }
    }
}

fn read_stats(path: &Path) -> Result<StatsMap> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read stats {}", path.display()))?;
    let stats = serde_json::from_str(&contents)
        .with_context(|| format!("parse stats {}", path.display()))?;
    Ok(stats)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp stats {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace stats {}", path.display()))?;
    Ok(())
}
