//! Durable record of completed work items.
//!
//! The store is a plain markdown list, one `- <item>` line per completed item,
//! appended after each success. Duplicate lines are tolerated and collapse on
//! load.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*-\s+(.+)$").expect("progress entry regex is valid"));

#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    /// Open the store, creating an empty file (and parent dirs) if missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create progress dir {}", parent.display()))?;
            }
            fs::write(&path, "")
                .with_context(|| format!("create progress file {}", path.display()))?;
            debug!(path = %path.display(), "created progress file");
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set of items recorded as done.
    pub fn load(&self) -> Result<BTreeSet<String>> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read progress file {}", self.path.display()))?;
        let done: BTreeSet<String> = contents
            .lines()
            .filter_map(|line| ENTRY_RE.captures(line))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .collect();
        debug!(path = %self.path.display(), entries = done.len(), "loaded progress");
        Ok(done)
    }

    /// Append one completed item. Flushed before returning.
    pub fn record(&self, item: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open progress file {}", self.path.display()))?;
        writeln!(file, "- {item}")
            .with_context(|| format!("append progress entry to {}", self.path.display()))?;
        file.sync_data()
            .with_context(|| format!("sync progress file {}", self.path.display()))?;
        debug!(item, "recorded progress");
        Ok(())
    }
}
