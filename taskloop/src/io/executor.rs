//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples the run loop from the actual agent backend
//! (by default `codex exec`). Tests use scripted executors that return
//! predetermined results without spawning processes.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::AgentResult;
use crate::io::process::run_command;

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Instruction text fed to the agent on stdin.
    pub prompt: String,
}

/// Abstraction over agent execution backends.
pub trait Executor {
    /// Run the agent to completion.
    ///
    /// A nonzero exit is a normal `Ok` result; `Err` means the agent could not
    /// be run at all (spawn or pipe failure).
    fn exec(&self, request: &ExecRequest) -> Result<AgentResult>;
}

/// Executor that spawns `<program> <args...> -` with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct AgentExecutor {
    pub program: String,
    pub args: Vec<String>,
}

impl AgentExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn command(&self, request: &ExecRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg("-").current_dir(&request.workdir);
        cmd
    }
}

impl Executor for AgentExecutor {
    #[instrument(skip_all, fields(program = %self.program, prompt_bytes = request.prompt.len()))]
    fn exec(&self, request: &ExecRequest) -> Result<AgentResult> {
        info!(workdir = %request.workdir.display(), "starting agent");

        let output = run_command(self.command(request), Some(request.prompt.as_bytes()))
            .with_context(|| format!("run {}", self.program))?;

        let exit_code = output.exit_code();
        if output.status.success() {
            debug!("agent exited cleanly");
        } else {
            warn!(exit_code, "agent exited with failure status");
        }
        Ok(AgentResult::new(exit_code, output.merged_text()))
    }
}
