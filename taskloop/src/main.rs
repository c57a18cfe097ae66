//! Unattended coding-agent loop.
//!
//! `taskloop specs` works through numbered spec files under `docs/tasks`;
//! `taskloop project` asks the agent for the next tracker issue of one project
//! until it reports that none remain.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use taskloop::core::classifier::MarkerClassifier;
use taskloop::error::{ConfigError, RetryExhaustedError};
use taskloop::exit_codes;
use taskloop::io::clock::SystemClock;
use taskloop::io::config::{
    CONFIG_FILE_NAME, ConfigOverrides, OverrideTarget, TaskloopConfig, apply_overrides,
    load_config, write_config,
};
use taskloop::io::executor::AgentExecutor;
use taskloop::io::paths::{find_executable, find_repo_root, resolve};
use taskloop::io::progress::ProgressStore;
use taskloop::io::run_log::RunLog;
use taskloop::io::work_queue::{FileQueue, TokenQueue, WorkQueue};
use taskloop::logging;
use taskloop::looping::{LoopSettings, run_loop};

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Run a coding agent over a queue of work items until it is done"
)]
struct Cli {
    /// Repository root. Defaults to the nearest ancestor containing AGENTS.MD or .git.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file. Defaults to `taskloop.toml` at the repository root.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `taskloop.toml` at the repository root.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Implement each numbered spec file in order.
    Specs(SpecsArgs),
    /// Implement tracker issues of one project until none remain.
    Project(ProjectArgs),
}

/// Flags shared by both modes.
#[derive(Args, Debug)]
struct RunArgs {
    /// Agent executable (default: codex).
    #[arg(long)]
    agent_exe: Option<String>,

    /// Whitespace-separated agent arguments placed before the trailing `-`.
    #[arg(long, allow_hyphen_values = true)]
    agent_args: Option<String>,

    /// Attempts per item before the run halts (default: 5).
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Append-only run log.
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Completion marker the agent prints after committing.
    #[arg(long)]
    magic_phrase: Option<String>,

    /// Log and print each invocation without running the agent.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct SpecsArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Directory of `NNNN-*.md` spec files (default: docs/tasks).
    #[arg(long)]
    specs_dir: Option<PathBuf>,

    /// Progress file of completed specs (default: docs/done.md).
    #[arg(long)]
    done_path: Option<PathBuf>,

    /// Stop after this many completed specs; 0 means no cap.
    #[arg(long)]
    max_items: Option<u32>,
}

#[derive(Args, Debug)]
struct ProjectArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Project name or id. Defaults to the `## PROJECT` entry in the notes file.
    #[arg(long)]
    project: Option<String>,

    /// Notes file holding the `## PROJECT` section (default: AGENTS.MD).
    #[arg(long)]
    notes_path: Option<PathBuf>,

    /// Marker the agent prints when no issues remain.
    #[arg(long)]
    no_tasks_phrase: Option<String>,

    /// Stop after this many completed tasks; 0 means no cap (default: 50).
    #[arg(long)]
    max_tasks: Option<u32>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            agent_exe: self.agent_exe.clone(),
            agent_args: self.agent_args.clone(),
            max_attempts: self.max_attempts,
            log_path: self.log_path.clone(),
            magic_phrase: self.magic_phrase.clone(),
            ..ConfigOverrides::default()
        }
    }
}

impl SpecsArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            specs_dir: self.specs_dir.clone(),
            done_path: self.done_path.clone(),
            max_items: self.max_items,
            ..self.run.overrides()
        }
    }
}

impl ProjectArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            project: self.project.clone(),
            notes_path: self.notes_path.clone(),
            no_tasks_phrase: self.no_tasks_phrase.clone(),
            max_tasks: self.max_tasks,
            ..self.run.overrides()
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = match &cli.root {
        Some(root) => root.clone(),
        None => find_repo_root(&env::current_dir().context("read current directory")?),
    };
    let config_path = match &cli.config {
        Some(path) => resolve(&root, path),
        None => root.join(CONFIG_FILE_NAME),
    };

    match &cli.command {
        Command::Init { force } => cmd_init(&config_path, *force),
        Command::Specs(args) => {
            let cfg = load_merged(&config_path, &args.overrides(), OverrideTarget::Specs)?;
            cmd_specs(&root, &cfg, args.run.dry_run)
        }
        Command::Project(args) => {
            let cfg = load_merged(&config_path, &args.overrides(), OverrideTarget::Project)?;
            cmd_project(&root, &cfg, args.run.dry_run)
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!("{} already exists", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &TaskloopConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn load_merged(
    config_path: &Path,
    overrides: &ConfigOverrides,
    target: OverrideTarget,
) -> Result<TaskloopConfig> {
    let base = load_config(config_path)?;
    apply_overrides(base, overrides, target)
}

fn cmd_specs(root: &Path, cfg: &TaskloopConfig, dry_run: bool) -> Result<i32> {
    let executor = agent_executor(cfg)?;
    let store = ProgressStore::open(resolve(root, &cfg.specs.done_path))?;
    let queue = FileQueue::open(root, &resolve(root, &cfg.specs.dir), store)?;
    let settings = LoopSettings {
        workdir: root.to_path_buf(),
        magic_phrase: cfg.specs.magic_phrase.clone(),
        no_work_phrase: None,
        max_attempts_per_item: cfg.max_attempts_per_item,
        max_items: cap(cfg.specs.max_items),
        rate_limit: cfg.rate_limit.policy(),
        dry_run,
    };
    let classifier = MarkerClassifier::new(cfg.specs.magic_phrase.clone(), None);
    let log = RunLog::new(resolve(root, &cfg.specs.log_path));
    drive(WorkQueue::Files(queue), &executor, &classifier, &log, &settings)
}

fn cmd_project(root: &Path, cfg: &TaskloopConfig, dry_run: bool) -> Result<i32> {
    let executor = agent_executor(cfg)?;
    let queue = TokenQueue::resolve(
        cfg.project.token.as_deref(),
        &resolve(root, &cfg.project.notes_path),
    )?;
    info!(project = queue.token(), "resolved project");
    let no_work = cfg.project.no_tasks_phrase.clone();
    let settings = LoopSettings {
        workdir: root.to_path_buf(),
        magic_phrase: cfg.project.magic_phrase.clone(),
        no_work_phrase: Some(no_work.clone()),
        max_attempts_per_item: cfg.max_attempts_per_item,
        max_items: cap(cfg.project.max_tasks),
        rate_limit: cfg.rate_limit.policy(),
        dry_run,
    };
    let classifier = MarkerClassifier::new(cfg.project.magic_phrase.clone(), Some(no_work));
    let log = RunLog::new(resolve(root, &cfg.project.log_path));
    drive(WorkQueue::Token(queue), &executor, &classifier, &log, &settings)
}

/// Resolve the agent executable before any attempt so a typo fails fast.
fn agent_executor(cfg: &TaskloopConfig) -> Result<AgentExecutor> {
    let program = find_executable(&cfg.agent.executable)
        .ok_or_else(|| ConfigError::ExecutableNotFound(cfg.agent.executable.clone()))?;
    // The agent runs with the repo root as cwd, so pin relative paths first.
    let program = std::path::absolute(&program)
        .with_context(|| format!("resolve {}", program.display()))?;
    Ok(AgentExecutor::new(
        program.to_string_lossy(),
        cfg.agent.args.clone(),
    ))
}

fn cap(limit: u32) -> Option<u32> {
    (limit > 0).then_some(limit)
}

fn drive(
    mut queue: WorkQueue,
    executor: &AgentExecutor,
    classifier: &MarkerClassifier,
    log: &RunLog,
    settings: &LoopSettings,
) -> Result<i32> {
    let result = run_loop(
        &mut queue,
        executor,
        classifier,
        &SystemClock,
        log,
        settings,
        |event| println!("{event}"),
    );
    match result {
        Ok(outcome) => {
            info!(stop = ?outcome.stop, "run finished");
            println!("\n{}", outcome.state);
            Ok(exit_codes::OK)
        }
        Err(err) => match err.downcast_ref::<RetryExhaustedError>() {
            Some(exhausted) => {
                println!("[error] {exhausted}");
                println!("\n{}", exhausted.state);
                Ok(exit_codes::EXHAUSTED)
            }
            None => Err(err),
        },
    }
}
