//! Work queue backends for the run loop.
//!
//! A run either walks a directory of numbered spec files or repeatedly asks the
//! agent to pick the next issue of one tracker project. Both are expressed as
//! [`WorkQueue`] so a single loop drives either.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::queue::{parse_project_token, select_task_files};
use crate::core::types::{RunState, WorkItem};
use crate::error::ConfigError;
use crate::io::paths::to_slash;
use crate::io::progress::ProgressStore;
use crate::io::prompt::PromptKind;

/// Source of work items for one run.
#[derive(Debug)]
pub enum WorkQueue {
    /// Numbered spec files, deduplicated against a progress store.
    Files(FileQueue),
    /// One tracker project; each item is "the next issue".
    Token(TokenQueue),
}

impl WorkQueue {
    /// Next item to consider, or `None` when the queue is exhausted.
    pub fn next_item(&mut self, state: &RunState) -> Option<WorkItem> {
        match self {
            Self::Files(queue) => queue.next_item(),
            Self::Token(queue) => Some(queue.next_item(state)),
        }
    }

    /// True if `item` completed in an earlier run.
    pub fn is_done(&self, item: &WorkItem) -> bool {
        match self {
            Self::Files(queue) => queue.done.contains(&item.id),
            Self::Token(_) => false,
        }
    }

    /// Persist completion of `item`.
    pub fn mark_done(&mut self, item: &WorkItem) -> Result<()> {
        match self {
            Self::Files(queue) => queue.mark_done(item),
            Self::Token(_) => Ok(()),
        }
    }

    pub fn prompt_kind(&self) -> PromptKind {
        match self {
            Self::Files(_) => PromptKind::Spec,
            Self::Token(_) => PromptKind::Project,
        }
    }

    /// Number of items, when the queue is finite.
    pub fn total(&self) -> Option<usize> {
        match self {
            Self::Files(queue) => Some(queue.items.len()),
            Self::Token(_) => None,
        }
    }

    /// True if every item stands for the same unbounded backlog.
    pub fn repeats(&self) -> bool {
        matches!(self, Self::Token(_))
    }
}

/// Spec files under one directory, in lexicographic order.
#[derive(Debug)]
pub struct FileQueue {
    items: Vec<WorkItem>,
    cursor: usize,
    store: ProgressStore,
    done: BTreeSet<String>,
}

impl FileQueue {
    /// List task files under `dir` and load the progress snapshot.
    ///
    /// Item ids are relative to `root` when `dir` lives under it, so progress
    /// entries stay valid if the checkout moves.
    pub fn open(root: &Path, dir: &Path, store: ProgressStore) -> Result<Self> {
        let items = list_task_files(root, dir)?;
        let done = store.load()?;
        info!(
            dir = %dir.display(),
            items = items.len(),
            done = done.len(),
            "loaded spec queue"
        );
        Ok(Self {
            items,
            cursor: 0,
            store,
            done,
        })
    }

    fn next_item(&mut self) -> Option<WorkItem> {
        let item = self.items.get(self.cursor).cloned();
        if item.is_some() {
            self.cursor += 1;
        }
        item
    }

    fn mark_done(&mut self, item: &WorkItem) -> Result<()> {
        self.store.record(&item.id)?;
        self.done.insert(item.id.clone());
        Ok(())
    }
}

/// Ordered task files directly under `dir`.
pub fn list_task_files(root: &Path, dir: &Path) -> Result<Vec<WorkItem>> {
    if !dir.is_dir() {
        return Err(ConfigError::QueueDirMissing(dir.to_path_buf()).into());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    let selected = select_task_files(names);
    if selected.is_empty() {
        return Err(ConfigError::EmptyQueue(dir.to_path_buf()).into());
    }
    debug!(count = selected.len(), "selected task files");
    Ok(selected
        .into_iter()
        .map(|name| WorkItem::new(item_id(root, &dir.join(name))))
        .collect())
}

fn item_id(root: &Path, path: &Path) -> String {
    to_slash(path.strip_prefix(root).unwrap_or(path))
}

/// A single tracker project, handed to the agent once per task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenQueue {
    token: String,
}

impl TokenQueue {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Use `explicit` if given, else the `## PROJECT` entry in `notes_path`.
    pub fn resolve(explicit: Option<&str>, notes_path: &Path) -> Result<Self> {
        if let Some(token) = explicit.map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(Self::new(token));
        }
        let from_notes = if notes_path.is_file() {
            let contents = fs::read_to_string(notes_path)
                .with_context(|| format!("read {}", notes_path.display()))?;
            parse_project_token(&contents)
        } else {
            None
        };
        match from_notes {
            Some(token) => {
                debug!(token, notes = %notes_path.display(), "project token from notes");
                Ok(Self::new(token))
            }
            None => Err(ConfigError::MissingProject {
                notes_path: PathBuf::from(notes_path),
            }
            .into()),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    fn next_item(&self, state: &RunState) -> WorkItem {
        WorkItem::with_label(
            self.token.clone(),
            format!("task {}", state.completed + 1),
        )
    }
}
