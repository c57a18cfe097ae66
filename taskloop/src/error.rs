//! Typed errors the CLI branches on.
//!
//! Everything else travels as `anyhow::Error`; these are downcast at the top
//! level to choose an exit code.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::RunState;

/// Startup problems detected before any work item is attempted.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no project token: pass --project or set one under ## PROJECT in {}", .notes_path.display())]
    MissingProject { notes_path: PathBuf },

    #[error("specs directory not found: {}", .0.display())]
    QueueDirMissing(PathBuf),

    #[error("no specs found in {}", .0.display())]
    EmptyQueue(PathBuf),

    #[error("agent executable not found on PATH: {0}")]
    ExecutableNotFound(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A work item used up its attempt budget. Halts the whole run.
#[derive(Error, Debug)]
#[error("max attempts exceeded for {item} ({attempts} attempts)")]
pub struct RetryExhaustedError {
    pub item: String,
    pub attempts: u32,
    /// Counters at the moment the run halted.
    pub state: RunState,
}
