//! The run loop: pull work, invoke the agent, classify, retry or back off.
//!
//! Each work item moves `Pending → Attempting → {Succeeded | Skipped | Abandoned}`:
//!
//! - items already in the progress store are skipped without an invocation;
//! - a rate-limit report sleeps and retries the same attempt;
//! - a failure (nonzero exit, missing marker, invocation error) consumes an
//!   attempt, and running out of attempts halts the whole run with
//!   [`RetryExhaustedError`];
//! - the no-work marker ends the run successfully.
//!
//! Progress is recorded after the success is observed, so a run killed in
//! between re-attempts that item next time.

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::backoff::RateLimitPolicy;
use crate::core::classifier::OutcomeClassifier;
use crate::core::types::{AgentResult, Outcome, RunState, WorkItem};
use crate::error::RetryExhaustedError;
use crate::io::clock::Clock;
use crate::io::executor::{ExecRequest, Executor};
use crate::io::prompt::PromptEngine;
use crate::io::run_log::{InvocationRecord, RunLog};
use crate::io::work_queue::WorkQueue;

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Working directory for the agent.
    pub workdir: PathBuf,
    pub magic_phrase: String,
    /// Spelled out in the instruction; classification uses the classifier's copy.
    pub no_work_phrase: Option<String>,
    pub max_attempts_per_item: u32,
    /// Stop after this many completed items.
    pub max_items: Option<u32>,
    pub rate_limit: RateLimitPolicy,
    /// Log and print each would-be invocation without running the agent.
    pub dry_run: bool,
}

/// Status transitions reported to the operator, one line each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent<'a> {
    Skip {
        item: &'a WorkItem,
    },
    DryRun {
        item: &'a WorkItem,
        attempt: u32,
    },
    Start {
        item: &'a WorkItem,
        attempt: u32,
        position: u32,
        total: Option<usize>,
    },
    InvocationError {
        item: &'a WorkItem,
        error: String,
    },
    Wait {
        secs: u64,
    },
    ExitFailure {
        item: &'a WorkItem,
        exit_code: i32,
    },
    MissingMarker {
        item: &'a WorkItem,
    },
    Done {
        item: &'a WorkItem,
    },
    NoWorkRemaining,
}

impl fmt::Display for LoopEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skip { item } => write!(f, "[skip] already done: {}", item.id),
            Self::DryRun { item, attempt } => {
                write!(f, "[dry-run] {} (attempt {attempt})", item.id)
            }
            Self::Start {
                item,
                attempt,
                position,
                total: Some(total),
            } => write!(
                f,
                "[start] Item {position} of {total} | attempt {attempt} :: {}",
                item.id
            ),
            Self::Start {
                item,
                attempt,
                total: None,
                ..
            } => write!(f, "[start] {} | attempt {attempt} :: {}", item.label, item.id),
            Self::InvocationError { item, error } => {
                write!(f, "[error] exception during agent run for {}: {error}", item.label)
            }
            Self::Wait { secs } => write!(
                f,
                "[wait] usage limit reached; sleeping {secs} seconds before retry"
            ),
            Self::ExitFailure { item, exit_code } => {
                write!(f, "[error] agent exit code {exit_code} for {}", item.label)
            }
            Self::MissingMarker { item } => {
                write!(f, "[retry] magic phrase not found for {}", item.label)
            }
            Self::Done { item } => write!(f, "[done] {}", item.label),
            Self::NoWorkRemaining => write!(f, "[done] no tasks remaining"),
        }
    }
}

/// Reason why `run_loop` stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// Every item was completed or skipped.
    QueueExhausted,
    /// `max_items` items were completed.
    ItemCap,
    /// The agent reported that no work remains.
    NoWorkRemaining,
    /// A dry run over a repeating queue simulated its single task.
    DryRunFinished,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub state: RunState,
    pub stop: LoopStop,
}

enum ItemResult {
    Succeeded,
    NoWorkRemaining,
    Simulated,
}

/// Drive the queue until it is exhausted, capped, or the agent reports no work.
///
/// Returns [`RetryExhaustedError`] (inside `anyhow::Error`) when an item uses up
/// its attempts; any other error comes from the log or progress store.
#[instrument(skip_all, fields(max_attempts = settings.max_attempts_per_item, dry_run = settings.dry_run))]
pub fn run_loop<E, C, K, F>(
    queue: &mut WorkQueue,
    executor: &E,
    classifier: &C,
    clock: &K,
    log: &RunLog,
    settings: &LoopSettings,
    mut on_event: F,
) -> Result<LoopOutcome>
where
    E: Executor,
    C: OutcomeClassifier,
    K: Clock,
    F: FnMut(&LoopEvent<'_>),
{
    let prompts = PromptEngine::new();
    let mut state = RunState::default();

    loop {
        if let Some(cap) = settings.max_items
            && state.completed >= cap
        {
            info!(cap, "item cap reached");
            return Ok(LoopOutcome {
                state,
                stop: LoopStop::ItemCap,
            });
        }

        let Some(item) = queue.next_item(&state) else {
            info!(?state, "queue exhausted");
            return Ok(LoopOutcome {
                state,
                stop: LoopStop::QueueExhausted,
            });
        };

        if queue.is_done(&item) {
            state.skipped += 1;
            on_event(&LoopEvent::Skip { item: &item });
            continue;
        }

        let prompt = prompts.render(
            queue.prompt_kind(),
            &item.id,
            &settings.magic_phrase,
            settings.no_work_phrase.as_deref(),
        )?;
        let attempt = AttemptContext {
            item: &item,
            prompt: &prompt,
            total: queue.total(),
            executor,
            classifier,
            clock,
            log,
            settings,
        };

        match attempt.run(&mut state, &mut on_event)? {
            ItemResult::Succeeded => {
                queue.mark_done(&item)?;
                state.completed += 1;
                state.attempt = 0;
                info!(item = %item.label, completed = state.completed, "item completed");
                on_event(&LoopEvent::Done { item: &item });
            }
            ItemResult::NoWorkRemaining => {
                state.attempt = 0;
                on_event(&LoopEvent::NoWorkRemaining);
                return Ok(LoopOutcome {
                    state,
                    stop: LoopStop::NoWorkRemaining,
                });
            }
            ItemResult::Simulated => {
                state.attempt = 0;
                if queue.repeats() {
                    return Ok(LoopOutcome {
                        state,
                        stop: LoopStop::DryRunFinished,
                    });
                }
            }
        }
    }
}

/// Everything needed to drive one item through its attempts.
struct AttemptContext<'a, E, C, K> {
    item: &'a WorkItem,
    prompt: &'a str,
    total: Option<usize>,
    executor: &'a E,
    classifier: &'a C,
    clock: &'a K,
    log: &'a RunLog,
    settings: &'a LoopSettings,
}

impl<E: Executor, C: OutcomeClassifier, K: Clock> AttemptContext<'_, E, C, K> {
    fn run<F: FnMut(&LoopEvent<'_>)>(
        &self,
        state: &mut RunState,
        on_event: &mut F,
    ) -> Result<ItemResult> {
        let item = self.item;
        state.attempt = 1;

        loop {
            if state.attempt > self.settings.max_attempts_per_item {
                state.failed += 1;
                let attempts = state.attempt - 1;
                state.attempt = 0;
                warn!(item = %item.label, attempts, "attempts exhausted");
                return Err(RetryExhaustedError {
                    item: item.label.clone(),
                    attempts,
                    state: *state,
                }
                .into());
            }

            self.log.begin(&InvocationRecord {
                label: &item.label,
                attempt: state.attempt,
                timestamp: self.clock.now(),
            })?;

            if self.settings.dry_run {
                on_event(&LoopEvent::DryRun {
                    item,
                    attempt: state.attempt,
                });
                return Ok(ItemResult::Simulated);
            }

            on_event(&LoopEvent::Start {
                item,
                attempt: state.attempt,
                position: state.position(),
                total: self.total,
            });

            let result = match self.invoke() {
                Ok(result) => result,
                Err(err) => {
                    warn!(item = %item.label, attempt = state.attempt, err = %format!("{err:#}"), "agent invocation failed");
                    self.log.append_exception(&err)?;
                    on_event(&LoopEvent::InvocationError {
                        item,
                        error: format!("{err:#}"),
                    });
                    state.attempt += 1;
                    continue;
                }
            };
            self.log.append_output(&result.output)?;

            match self
                .classifier
                .classify(&result, self.clock.now_epoch_secs())
            {
                Outcome::RateLimited { reset_in_secs } => {
                    let wait = self.settings.rate_limit.wait_for(reset_in_secs);
                    info!(item = %item.label, ?reset_in_secs, wait_secs = wait.as_secs(), "rate limited");
                    on_event(&LoopEvent::Wait {
                        secs: wait.as_secs(),
                    });
                    self.clock.sleep(wait);
                }
                Outcome::NoWorkRemaining => return Ok(ItemResult::NoWorkRemaining),
                Outcome::RetryableFailure => {
                    if result.success() {
                        on_event(&LoopEvent::MissingMarker { item });
                    } else {
                        on_event(&LoopEvent::ExitFailure {
                            item,
                            exit_code: result.exit_code,
                        });
                    }
                    state.attempt += 1;
                }
                Outcome::Success => return Ok(ItemResult::Succeeded),
            }
        }
    }

    fn invoke(&self) -> Result<AgentResult> {
        self.executor.exec(&ExecRequest {
            workdir: self.settings.workdir.clone(),
            prompt: self.prompt.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::MarkerClassifier;
    use crate::io::work_queue::TokenQueue;
    use crate::test_support::{FakeClock, ScriptedExec, ScriptedExecutor, TestWorkspace};
    use std::time::Duration;

    fn spec_classifier() -> MarkerClassifier {
        MarkerClassifier::new("SPEC_COMPLETE", None)
    }

    fn workspace_with(specs: &[&str]) -> TestWorkspace {
        let ws = TestWorkspace::new().expect("workspace");
        for spec in specs {
            ws.write_spec(spec).expect("spec");
        }
        ws
    }

    fn headers(log: &str) -> Vec<&str> {
        log.lines().filter(|line| line.starts_with("=== ")).collect()
    }

    #[test]
    fn completes_every_item_on_first_attempt() {
        let ws = workspace_with(&["0001-a.md", "0002-b.md"]);
        let mut queue = ws.file_queue().expect("queue");
        let executor = ScriptedExecutor::repeat(ScriptedExec::output(0, "ok\nSPEC_COMPLETE\n"), 2);
        let clock = FakeClock::new();
        let mut lines = Vec::new();

        let outcome = run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &clock,
            &ws.run_log(),
            &ws.spec_settings(),
            |event| lines.push(event.to_string()),
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::QueueExhausted);
        assert_eq!(
            (outcome.state.completed, outcome.state.skipped, outcome.state.failed),
            (2, 0, 0)
        );
        assert_eq!(ws.read_done(), "- docs/tasks/0001-a.md\n- docs/tasks/0002-b.md\n");
        assert_eq!(
            lines,
            vec![
                "[start] Item 1 of 2 | attempt 1 :: docs/tasks/0001-a.md",
                "[done] docs/tasks/0001-a.md",
                "[start] Item 2 of 2 | attempt 1 :: docs/tasks/0002-b.md",
                "[done] docs/tasks/0002-b.md",
            ]
        );
        let prompts = executor.prompts();
        assert!(prompts[0].starts_with("Implement spec: docs/tasks/0001-a.md\n"));
        assert!(prompts[1].starts_with("Implement spec: docs/tasks/0002-b.md\n"));
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn resumed_run_skips_recorded_items() {
        let ws = workspace_with(&["0001-a.md", "0002-b.md"]);
        std::fs::write(ws.done_path(), "- docs/tasks/0001-a.md\n").expect("done");
        let mut queue = ws.file_queue().expect("queue");
        let executor = ScriptedExecutor::new(vec![ScriptedExec::output(0, "SPEC_COMPLETE")]);
        let mut lines = Vec::new();

        let outcome = run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &FakeClock::new(),
            &ws.run_log(),
            &ws.spec_settings(),
            |event| lines.push(event.to_string()),
        )
        .expect("loop");

        assert_eq!(outcome.state.completed, 1);
        assert_eq!(outcome.state.skipped, 1);
        assert_eq!(executor.calls(), 1);
        assert_eq!(lines[0], "[skip] already done: docs/tasks/0001-a.md");
        assert_eq!(
            lines[1],
            "[start] Item 2 of 2 | attempt 1 :: docs/tasks/0002-b.md"
        );
    }

    #[test]
    fn rate_limit_without_reset_sleeps_an_hour_and_keeps_attempt() {
        let ws = workspace_with(&["0001-a.md"]);
        let mut queue = ws.file_queue().expect("queue");
        let executor = ScriptedExecutor::new(vec![
            ScriptedExec::output(1, "error: 429 Too Many Requests"),
            ScriptedExec::output(0, "SPEC_COMPLETE"),
        ]);
        let clock = FakeClock::new();
        let mut lines = Vec::new();

        let outcome = run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &clock,
            &ws.run_log(),
            &ws.spec_settings(),
            |event| lines.push(event.to_string()),
        )
        .expect("loop");

        assert_eq!(outcome.state.completed, 1);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3600)]);
        assert!(lines.contains(
            &"[wait] usage limit reached; sleeping 3600 seconds before retry".to_string()
        ));
        let log = ws.read_log();
        let headers = headers(&log);
        assert_eq!(headers.len(), 2);
        assert!(headers.iter().all(|h| h.ends_with("| attempt 1 ===")));
    }

    #[test]
    fn rate_limit_with_reset_is_padded() {
        let ws = workspace_with(&["0001-a.md"]);
        let mut queue = ws.file_queue().expect("queue");
        let executor = ScriptedExecutor::new(vec![
            ScriptedExec::output(
                0,
                r#"{"error":{"type":"usage_limit_reached","resets_in_seconds":120}}"#,
            ),
            ScriptedExec::output(0, "SPEC_COMPLETE"),
        ]);
        let clock = FakeClock::new();

        run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &clock,
            &ws.run_log(),
            &ws.spec_settings(),
            |_| {},
        )
        .expect("loop");

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(150)]);
    }

    #[test]
    fn rate_limits_never_exhaust_attempts() {
        let ws = workspace_with(&["0001-a.md"]);
        let mut queue = ws.file_queue().expect("queue");
        let mut script = vec![ScriptedExec::output(0, "You've hit your usage limit"); 6];
        script.push(ScriptedExec::output(0, "SPEC_COMPLETE"));
        let executor = ScriptedExecutor::new(script);
        let clock = FakeClock::new();

        let outcome = run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &clock,
            &ws.run_log(),
            &ws.spec_settings(),
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.state.completed, 1);
        assert_eq!(clock.sleeps().len(), 6);
    }

    #[test]
    fn exhausted_attempts_halt_the_run() {
        let ws = workspace_with(&["0001-a.md", "0002-b.md"]);
        let mut queue = ws.file_queue().expect("queue");
        let executor = ScriptedExecutor::repeat(ScriptedExec::output(2, "boom"), 10);
        let settings = ws.spec_settings();

        let err = run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &FakeClock::new(),
            &ws.run_log(),
            &settings,
            |_| {},
        )
        .unwrap_err();

        let exhausted = err
            .downcast_ref::<RetryExhaustedError>()
            .expect("retry exhaustion");
        assert_eq!(exhausted.item, "docs/tasks/0001-a.md");
        assert_eq!(exhausted.attempts, settings.max_attempts_per_item);
        assert_eq!(exhausted.state.failed, 1);
        assert_eq!(exhausted.state.completed, 0);
        assert_eq!(executor.calls(), 3);
        assert_eq!(headers(&ws.read_log()).len(), 3);
        assert_eq!(ws.read_done(), "");
    }

    #[test]
    fn invocation_errors_consume_attempts_and_are_logged() {
        let ws = workspace_with(&["0001-a.md"]);
        let mut queue = ws.file_queue().expect("queue");
        let executor = ScriptedExecutor::new(vec![
            ScriptedExec::Fail("spawn command: No such file or directory".to_string()),
            ScriptedExec::output(0, "no marker here"),
            ScriptedExec::output(0, "SPEC_COMPLETE"),
        ]);
        let mut lines = Vec::new();

        let outcome = run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &FakeClock::new(),
            &ws.run_log(),
            &ws.spec_settings(),
            |event| lines.push(event.to_string()),
        )
        .expect("loop");

        assert_eq!(outcome.state.completed, 1);
        assert!(lines[1].starts_with("[error] exception during agent run for docs/tasks/0001-a.md"));
        assert_eq!(
            lines[3],
            "[retry] magic phrase not found for docs/tasks/0001-a.md"
        );
        assert_eq!(
            lines[4],
            "[start] Item 1 of 1 | attempt 3 :: docs/tasks/0001-a.md"
        );
        let log = ws.read_log();
        assert!(log.contains("[exception] agent invocation failed\n"));
        assert!(log.contains("No such file or directory"));
    }

    #[test]
    fn item_cap_stops_early() {
        let ws = workspace_with(&["0001-a.md", "0002-b.md", "0003-c.md"]);
        let mut queue = ws.file_queue().expect("queue");
        let executor = ScriptedExecutor::repeat(ScriptedExec::output(0, "SPEC_COMPLETE"), 3);
        let settings = LoopSettings {
            max_items: Some(2),
            ..ws.spec_settings()
        };

        let outcome = run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &FakeClock::new(),
            &ws.run_log(),
            &settings,
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::ItemCap);
        assert_eq!(outcome.state.completed, 2);
        assert_eq!(executor.calls(), 2);
    }

    #[test]
    fn dry_run_walks_file_queue_without_invoking() {
        let ws = workspace_with(&["0001-a.md", "0002-b.md"]);
        let mut queue = ws.file_queue().expect("queue");
        let executor = ScriptedExecutor::default();
        let settings = LoopSettings {
            dry_run: true,
            ..ws.spec_settings()
        };
        let mut lines = Vec::new();

        let outcome = run_loop(
            &mut queue,
            &executor,
            &spec_classifier(),
            &FakeClock::new(),
            &ws.run_log(),
            &settings,
            |event| lines.push(event.to_string()),
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::QueueExhausted);
        assert_eq!(executor.calls(), 0);
        assert_eq!(
            lines,
            vec![
                "[dry-run] docs/tasks/0001-a.md (attempt 1)",
                "[dry-run] docs/tasks/0002-b.md (attempt 1)",
            ]
        );
        assert_eq!(headers(&ws.read_log()).len(), 2);
        assert_eq!(ws.read_done(), "");
    }

    fn project_settings(ws: &TestWorkspace) -> LoopSettings {
        LoopSettings {
            magic_phrase: "TASK_COMPLETE".to_string(),
            no_work_phrase: Some("NO_TASKS_AVAILABLE".to_string()),
            max_items: Some(50),
            ..ws.spec_settings()
        }
    }

    fn project_classifier() -> MarkerClassifier {
        MarkerClassifier::new("TASK_COMPLETE", Some("NO_TASKS_AVAILABLE".to_string()))
    }

    #[test]
    fn token_queue_runs_until_no_work_remains() {
        let ws = TestWorkspace::new().expect("workspace");
        let mut queue = WorkQueue::Token(TokenQueue::new("Backend Rewrite"));
        let executor = ScriptedExecutor::new(vec![
            ScriptedExec::output(0, "TASK_COMPLETE"),
            ScriptedExec::output(0, "TASK_COMPLETE"),
            ScriptedExec::output(0, "NO_TASKS_AVAILABLE"),
        ]);
        let mut lines = Vec::new();

        let outcome = run_loop(
            &mut queue,
            &executor,
            &project_classifier(),
            &FakeClock::new(),
            &ws.run_log(),
            &project_settings(&ws),
            |event| lines.push(event.to_string()),
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::NoWorkRemaining);
        assert_eq!(outcome.state.completed, 2);
        assert_eq!(lines.last().map(String::as_str), Some("[done] no tasks remaining"));
        assert_eq!(lines[0], "[start] task 1 | attempt 1 :: Backend Rewrite");
        assert_eq!(lines[2], "[start] task 2 | attempt 1 :: Backend Rewrite");
        let prompts = executor.prompts();
        assert!(prompts[0].contains("this project:\nBackend Rewrite\n"));
        assert!(prompts[0].contains("NO_TASKS_AVAILABLE"));
        let log = ws.read_log();
        let headers = headers(&log);
        assert!(headers[0].ends_with("| task 1 | attempt 1 ==="));
        assert!(headers[2].ends_with("| task 3 | attempt 1 ==="));
    }

    #[test]
    fn token_queue_respects_task_cap() {
        let ws = TestWorkspace::new().expect("workspace");
        let mut queue = WorkQueue::Token(TokenQueue::new("PRJ"));
        let executor = ScriptedExecutor::repeat(ScriptedExec::output(0, "TASK_COMPLETE"), 5);
        let settings = LoopSettings {
            max_items: Some(2),
            ..project_settings(&ws)
        };

        let outcome = run_loop(
            &mut queue,
            &executor,
            &project_classifier(),
            &FakeClock::new(),
            &ws.run_log(),
            &settings,
            |_| {},
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::ItemCap);
        assert_eq!(executor.calls(), 2);
    }

    #[test]
    fn token_dry_run_simulates_one_task() {
        let ws = TestWorkspace::new().expect("workspace");
        let mut queue = WorkQueue::Token(TokenQueue::new("PRJ"));
        let executor = ScriptedExecutor::default();
        let settings = LoopSettings {
            dry_run: true,
            ..project_settings(&ws)
        };
        let mut lines = Vec::new();

        let outcome = run_loop(
            &mut queue,
            &executor,
            &project_classifier(),
            &FakeClock::new(),
            &ws.run_log(),
            &settings,
            |event| lines.push(event.to_string()),
        )
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::DryRunFinished);
        assert_eq!(lines, vec!["[dry-run] PRJ (attempt 1)"]);
        assert_eq!(executor.calls(), 0);
    }
}
