//! Configuration stored in `taskloop.toml` at the repository root.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::backoff::RateLimitPolicy;
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "taskloop.toml";

/// Loop configuration (TOML).
///
/// Every field has a default, so an absent file or a partial file is valid.
/// Command-line flags are layered on top with [`apply_overrides`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskloopConfig {
    /// Attempts allowed per work item before the run halts.
    pub max_attempts_per_item: u32,

    pub agent: AgentConfig,

    pub rate_limit: RateLimitConfig,

    pub specs: SpecsConfig,

    pub project: ProjectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable, looked up on `PATH`.
    pub executable: String,
    /// Arguments placed before the trailing `-`.
    pub args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: "codex".to_string(),
            args: vec![
                "exec".to_string(),
                "--dangerously-bypass-approvals-and-sandbox".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub padding_secs: u64,
    pub default_wait_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let policy = RateLimitPolicy::default();
        Self {
            padding_secs: policy.padding_secs,
            default_wait_secs: policy.default_wait_secs,
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            padding_secs: self.padding_secs,
            default_wait_secs: self.default_wait_secs,
        }
    }
}

/// Settings for `taskloop specs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SpecsConfig {
    pub dir: PathBuf,
    pub done_path: PathBuf,
    pub log_path: PathBuf,
    pub magic_phrase: String,
    /// Completed items per run; `0` means no cap.
    pub max_items: u32,
}

impl Default for SpecsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("docs/tasks"),
            done_path: PathBuf::from("docs/done.md"),
            log_path: PathBuf::from("docs/logs/agent-run.log"),
            magic_phrase: "SPEC_COMPLETE".to_string(),
            max_items: 0,
        }
    }
}

/// Settings for `taskloop project`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Explicit project token; otherwise read from `notes_path`.
    pub token: Option<String>,
    pub notes_path: PathBuf,
    pub log_path: PathBuf,
    pub magic_phrase: String,
    pub no_tasks_phrase: String,
    /// Completed tasks per run; `0` means no cap.
    pub max_tasks: u32,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            token: None,
            notes_path: PathBuf::from("AGENTS.MD"),
            log_path: PathBuf::from("docs/logs/project-run.log"),
            magic_phrase: "TASK_COMPLETE".to_string(),
            no_tasks_phrase: "NO_TASKS_AVAILABLE".to_string(),
            max_tasks: 50,
        }
    }
}

impl Default for TaskloopConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_item: 5,
            agent: AgentConfig::default(),
            rate_limit: RateLimitConfig::default(),
            specs: SpecsConfig::default(),
            project: ProjectConfig::default(),
        }
    }
}

impl TaskloopConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts_per_item == 0 {
            return Err(invalid("max_attempts_per_item must be > 0"));
        }
        if self.agent.executable.trim().is_empty() {
            return Err(invalid("agent.executable must not be empty"));
        }
        if self.specs.magic_phrase.is_empty() {
            return Err(invalid("specs.magic_phrase must not be empty"));
        }
        if self.project.magic_phrase.is_empty() || self.project.no_tasks_phrase.is_empty() {
            return Err(invalid(
                "project.magic_phrase and project.no_tasks_phrase must not be empty",
            ));
        }
        if self.project.magic_phrase == self.project.no_tasks_phrase {
            return Err(invalid(
                "project.magic_phrase and project.no_tasks_phrase must differ",
            ));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub agent_exe: Option<String>,
    /// Whitespace-separated, as typed on the command line.
    pub agent_args: Option<String>,
    pub max_attempts: Option<u32>,
    pub specs_dir: Option<PathBuf>,
    pub done_path: Option<PathBuf>,
    pub max_items: Option<u32>,
    pub project: Option<String>,
    pub notes_path: Option<PathBuf>,
    pub no_tasks_phrase: Option<String>,
    pub max_tasks: Option<u32>,
    /// Applies to whichever mode is running.
    pub log_path: Option<PathBuf>,
    /// Applies to whichever mode is running.
    pub magic_phrase: Option<String>,
}

/// Which mode's settings mode-agnostic overrides land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideTarget {
    Specs,
    Project,
}

/// Apply command-line overrides to the loaded configuration.
pub fn apply_overrides(
    mut base: TaskloopConfig,
    overrides: &ConfigOverrides,
    target: OverrideTarget,
) -> Result<TaskloopConfig> {
    if let Some(exe) = &overrides.agent_exe {
        base.agent.executable = exe.clone();
    }
    if let Some(args) = &overrides.agent_args {
        base.agent.args = args.split_whitespace().map(str::to_string).collect();
    }
    if let Some(max_attempts) = overrides.max_attempts {
        base.max_attempts_per_item = max_attempts;
    }
    if let Some(dir) = &overrides.specs_dir {
        base.specs.dir = dir.clone();
    }
    if let Some(done_path) = &overrides.done_path {
        base.specs.done_path = done_path.clone();
    }
    if let Some(max_items) = overrides.max_items {
        base.specs.max_items = max_items;
    }
    if let Some(project) = &overrides.project {
        base.project.token = Some(project.clone());
    }
    if let Some(notes_path) = &overrides.notes_path {
        base.project.notes_path = notes_path.clone();
    }
    if let Some(phrase) = &overrides.no_tasks_phrase {
        base.project.no_tasks_phrase = phrase.clone();
    }
    if let Some(max_tasks) = overrides.max_tasks {
        base.project.max_tasks = max_tasks;
    }
    match target {
        OverrideTarget::Specs => {
            if let Some(log_path) = &overrides.log_path {
                base.specs.log_path = log_path.clone();
            }
            if let Some(phrase) = &overrides.magic_phrase {
                base.specs.magic_phrase = phrase.clone();
            }
        }
        OverrideTarget::Project => {
            if let Some(log_path) = &overrides.log_path {
                base.project.log_path = log_path.clone();
            }
            if let Some(phrase) = &overrides.magic_phrase {
                base.project.magic_phrase = phrase.clone();
            }
        }
    }
    base.validate()?;
    Ok(base)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `TaskloopConfig::default()`.
pub fn load_config(path: &Path) -> Result<TaskloopConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = TaskloopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: TaskloopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    debug!(path = %path.display(), "loaded config");
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &TaskloopConfig) -> Result<()> {
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
