//! Test-only helpers: scripted agents, a fake clock, and scratch workspaces.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local, TimeZone};
use tempfile::TempDir;

use crate::core::backoff::RateLimitPolicy;
use crate::core::types::AgentResult;
use crate::io::clock::Clock;
use crate::io::executor::{ExecRequest, Executor};
use crate::io::progress::ProgressStore;
use crate::io::run_log::RunLog;
use crate::io::work_queue::{FileQueue, WorkQueue};
use crate::looping::LoopSettings;

/// One scripted agent response.
#[derive(Debug, Clone)]
pub enum ScriptedExec {
    /// The agent ran and produced this result.
    Result(AgentResult),
    /// The agent could not be run.
    Fail(String),
}

impl ScriptedExec {
    pub fn output(exit_code: i32, output: &str) -> Self {
        Self::Result(AgentResult::new(exit_code, output))
    }
}

/// Executor that replays scripted responses in order and records requests.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    script: RefCell<VecDeque<ScriptedExec>>,
    requests: RefCell<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<ScriptedExec>) -> Self {
        Self {
            script: RefCell::new(script.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Same response for `times` calls.
    pub fn repeat(exec: ScriptedExec, times: usize) -> Self {
        Self::new(vec![exec; times])
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.prompt.clone())
            .collect()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest) -> Result<AgentResult> {
        self.requests.borrow_mut().push(request.clone());
        match self.script.borrow_mut().pop_front() {
            Some(ScriptedExec::Result(result)) => Ok(result),
            Some(ScriptedExec::Fail(msg)) => Err(anyhow!(msg)),
            None => Err(anyhow!("scripted executor exhausted")),
        }
    }
}

/// Clock frozen at a fixed instant that advances only when slept on.
#[derive(Debug)]
pub struct FakeClock {
    now: Cell<DateTime<Local>>,
    sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        let start = Local
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid timestamp");
        Self {
            now: Cell::new(start),
            sleeps: RefCell::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Local> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        let advanced = self.now.get()
            + chrono::Duration::from_std(duration).expect("sleep fits in chrono duration");
        self.now.set(advanced);
    }
}

/// Scratch repository with a `docs/tasks` queue.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        fs::create_dir_all(temp.path().join("docs").join("tasks"))?;
        Ok(Self { temp })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root().join("docs").join("tasks")
    }

    pub fn done_path(&self) -> PathBuf {
        self.root().join("docs").join("done.md")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root().join("docs").join("logs").join("agent-run.log")
    }

    pub fn write_spec(&self, name: &str) -> Result<()> {
        fs::write(self.tasks_dir().join(name), format!("# {name}\n"))?;
        Ok(())
    }

    pub fn file_queue(&self) -> Result<WorkQueue> {
        let store = ProgressStore::open(self.done_path())?;
        Ok(WorkQueue::Files(FileQueue::open(
            self.root(),
            &self.tasks_dir(),
            store,
        )?))
    }

    pub fn run_log(&self) -> RunLog {
        RunLog::new(self.log_path())
    }

    pub fn read_log(&self) -> String {
        fs::read_to_string(self.log_path()).unwrap_or_default()
    }

    pub fn read_done(&self) -> String {
        fs::read_to_string(self.done_path()).unwrap_or_default()
    }

    /// Settings for a spec run rooted at this workspace.
    pub fn spec_settings(&self) -> LoopSettings {
        LoopSettings {
            workdir: self.root().to_path_buf(),
            magic_phrase: "SPEC_COMPLETE".to_string(),
            no_work_phrase: None,
            max_attempts_per_item: 3,
            max_items: None,
            rate_limit: RateLimitPolicy::default(),
            dry_run: false,
        }
    }
}
