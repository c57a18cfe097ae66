//! Shared deterministic types for the run loop.
//!
//! These types define stable contracts between the queue, the executor, the
//! classifier and the loop. They carry no I/O handles.

use std::fmt;

/// One unit of work handed to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Identifier embedded in the instruction (spec path or project token).
    pub id: String,
    /// Human-facing label used in log headers and status lines.
    pub label: String,
}

impl WorkItem {
    /// Item whose label is its identifier (spec files).
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
        }
    }

    pub fn with_label(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Exit code and merged output of one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResult {
    /// Process exit code. `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// Stdout followed by stderr.
    pub output: String,
}

impl AgentResult {
    pub fn new(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Classification of one invocation. Exactly one variant applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The agent emitted the completion marker.
    Success,
    /// The agent reported a usage limit. `None` means no reset time was found.
    RateLimited { reset_in_secs: Option<u64> },
    /// Nonzero exit, or a clean exit without the completion marker.
    RetryableFailure,
    /// The agent reported that the tracker has no remaining work.
    NoWorkRemaining,
}

/// In-memory counters for one run. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunState {
    pub completed: u32,
    pub skipped: u32,
    pub failed: u32,
    /// Attempt number of the in-flight item (1-indexed, 0 when idle).
    pub attempt: u32,
}

impl RunState {
    /// 1-indexed position of the next item, counting skipped ones.
    pub fn position(&self) -> u32 {
        self.completed + self.skipped + 1
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Summary ===")?;
        writeln!(f, "Completed: {}", self.completed)?;
        writeln!(f, "Skipped:   {}", self.skipped)?;
        write!(f, "Failed:    {}", self.failed)
    }
}
