//! Iteration controller for `steer run`.
//!
//! Each iteration: write a RUNNING snapshot, honor the stop sentinel, read
//! pending feedback, capture the progress marker, invoke the agent, re-measure
//! progress, then let [`decide`] pick continue/stop. Terminations are values
//! ([`LoopStop`]); only runner-side I/O failures surface as `Err`.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use anyhow::{Result, anyhow};
use chrono::{Local, Utc};
use tracing::{debug, info, instrument, warn};

use crate::core::breaker::{BreakerState, Decision, IterationSignals, decide};
use crate::core::checkpoint::{checkpoint_number, is_checkpoint, next_checkpoint};
use crate::core::tasks::{TaskCounts, count_tasks, current_task};
use crate::core::types::{AgentExit, LoopOutcome, LoopStop, RunMode};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::config::RunnerConfig;
use crate::io::feedback::FeedbackStore;
use crate::io::git::ProgressSource;
use crate::io::init::SteerPaths;
use crate::io::iteration_log::{IterationMeta, IterationPaths, run_id_at, write_meta};
use crate::io::prompt::{PromptInputs, build_prompt};
use crate::io::run_state::{
    CurrentTask, IterationInfo, RunState, RunStatus, StateStore, TaskStatus,
    collect_code_metrics,
};
use crate::io::stop::consume_stop_request;

/// What the controller observed and decided for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub run_id: String,
    pub iteration: u32,
    pub exit: AgentExit,
    pub commit_before: Option<String>,
    pub commit_after: Option<String>,
    pub new_commits: u32,
    pub breaker: BreakerState,
    pub decision: Decision,
    pub archived_feedback: Option<PathBuf>,
}

impl IterationReport {
    pub fn progressed(&self) -> bool {
        self.commit_before != self.commit_after
    }
}

/// Task view used for snapshots and prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaskView {
    counts: Option<TaskCounts>,
    description: String,
}

fn task_view(mode: &RunMode) -> TaskView {
    match mode {
        RunMode::SteeringDriven => TaskView {
            counts: None,
            description: "Working from steering documents".to_string(),
        },
        RunMode::TaskDriven { tasks_file, .. } => match fs::read_to_string(tasks_file) {
            Ok(content) => TaskView {
                counts: Some(count_tasks(&content)),
                description: current_task(&content)
                    .unwrap_or_else(|| "Waiting for next task".to_string()),
            },
            Err(err) => {
                warn!(path = %tasks_file.display(), error = %err, "tasks.md unreadable");
                TaskView {
                    counts: None,
                    description: "No tasks.md found".to_string(),
                }
            }
        },
    }
}

/// Fail fast when the steering documents are missing.
pub fn validate_environment(paths: &SteerPaths) -> Result<()> {
    if !paths.product_path.is_file() {
        return Err(anyhow!(
            "steering document not found: {} (run `steer init` first)",
            paths.product_path.display()
        ));
    }
    Ok(())
}

/// Short label for logs and `meta.json`.
pub fn decision_label(decision: &Decision) -> &'static str {
    match decision {
        Decision::Continue { retrying: true, .. } => "retry",
        Decision::Continue { .. } => "continue",
        Decision::Stop(stop) => match stop {
            LoopStop::StopRequested { .. } => "stop_requested",
            LoopStop::Complete { .. } => "complete",
            LoopStop::Escalated { .. } => "escalated",
            LoopStop::CircuitBreaker { .. } => "circuit_breaker",
            LoopStop::UnknownExit { .. } => "unknown_exit",
            LoopStop::Checkpoint { .. } => "checkpoint",
            LoopStop::MaxIterations { .. } => "max_iterations",
        },
    }
}

struct Snapshots<'a> {
    store: StateStore,
    paths: &'a SteerPaths,
    max_iterations: u32,
}

impl Snapshots<'_> {
    fn write(
        &mut self,
        status: RunStatus,
        iteration: u32,
        description: &str,
        task_status: TaskStatus,
        last_output: &str,
    ) -> Result<()> {
        let state = RunState {
            status,
            iteration: IterationInfo {
                current: iteration,
                specified: self.max_iterations,
            },
            code_metrics: collect_code_metrics(&self.paths.root),
            current_task: CurrentTask {
                description: description.to_string(),
                status: task_status,
            },
            last_output: last_output.to_string(),
            timestamp: Utc::now(),
        };
        self.store.save(&state)?;
        Ok(())
    }
}

/// Run the iteration loop until a [`LoopStop`] is reached.
///
/// The iteration counter starts at 0 on every call; `max_iterations` counts
/// iterations since the last manual restart. `on_iteration` is called after
/// every agent invocation.
#[instrument(skip_all, fields(max_iterations = config.max_iterations))]
pub fn run_loop<A, P, F>(
    paths: &SteerPaths,
    config: &RunnerConfig,
    agent: &A,
    progress: &P,
    mut on_iteration: F,
) -> Result<LoopOutcome>
where
    A: Agent,
    P: ProgressSource,
    F: FnMut(&IterationReport),
{
    validate_environment(paths)?;

    let mut run = LoopRun {
        run_id: run_id_at(Local::now()),
        mode: config.run_mode(paths),
        config,
        agent,
        progress,
        feedback: FeedbackStore::new(paths),
        snapshots: Snapshots {
            store: StateStore::new(&paths.state_path),
            paths,
            max_iterations: config.max_iterations,
        },
        iteration: 0,
    };
    info!(run_id = %run.run_id, mode = %run.mode.describe(), "starting run");

    let result = run.iterate(&mut on_iteration);
    if let Err(err) = &result {
        // Best effort: the dashboard should not keep showing RUNNING.
        let message = format!("Runner error: {err:#}");
        if let Err(save_err) = run.snapshots.write(
            RunStatus::Error,
            run.iteration,
            &message,
            TaskStatus::Error,
            &message,
        ) {
            warn!(error = %format!("{save_err:#}"), "could not write error snapshot");
        }
    }

    let (iterations_run, stop) = result?;
    if stop.is_failure() {
        warn!(iterations_run, %stop, "run stopped, human intervention needed");
    } else {
        info!(iterations_run, %stop, "run stopped");
    }
    Ok(LoopOutcome {
        run_id: run.run_id,
        iterations_run,
        stop,
    })
}

struct LoopRun<'a, A, P> {
    run_id: String,
    mode: RunMode,
    config: &'a RunnerConfig,
    agent: &'a A,
    progress: &'a P,
    feedback: FeedbackStore,
    snapshots: Snapshots<'a>,
    /// Iteration in progress; 0 before the first one starts.
    iteration: u32,
}

impl<A: Agent, P: ProgressSource> LoopRun<'_, A, P> {
    fn iterate<F>(&mut self, on_iteration: &mut F) -> Result<(u32, LoopStop)>
    where
        F: FnMut(&IterationReport),
    {
        let config = self.config;
        let limits = config.breaker_limits();
        let mut breaker = BreakerState::default();

        for iteration in 1..=config.max_iterations {
            self.iteration = iteration;
            let started = Instant::now();
            info!(
                iteration,
                max_iterations = config.max_iterations,
                next_checkpoint = ?next_checkpoint(iteration - 1, config.checkpoint_interval),
                "iteration starting"
            );

            let tasks = task_view(&self.mode);
            if let Some(counts) = tasks.counts {
                info!(
                    pending = counts.pending,
                    in_progress = counts.in_progress,
                    completed = counts.completed,
                    "task status"
                );
            }

            self.snapshots.write(
                RunStatus::Running,
                iteration,
                &tasks.description,
                TaskStatus::InProgress,
                &format!("Iteration {iteration} starting..."),
            )?;

            let pending_feedback = match self.feedback.read_pending() {
                Ok(text) => text,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "could not read pending feedback");
                    None
                }
            };
            if pending_feedback.is_some() {
                info!("human feedback detected");
            }

            if consume_stop_request(&self.snapshots.paths.stop_path) {
                info!("exiting gracefully");
                self.snapshots.write(
                    RunStatus::Stopped,
                    iteration,
                    &tasks.description,
                    TaskStatus::Pending,
                    "Stop requested - exited gracefully",
                )?;
                return Ok((iteration - 1, LoopStop::StopRequested { iteration }));
            }

            let commit_before = self.progress.current_marker();
            if let Some(sha) = &commit_before {
                info!(commit = %short(sha), "current commit");
            }

            let prompt = build_prompt(&PromptInputs {
                iteration,
                max_iterations: config.max_iterations,
                mode: &self.mode,
                tasks: tasks.counts,
                current_task: tasks.counts.map(|_| tasks.description.as_str()),
                feedback: pending_feedback.as_deref(),
            })?;

            let iter_paths =
                IterationPaths::new(&self.snapshots.paths.iterations_dir, &self.run_id, iteration);
            let run = self.agent.invoke(&AgentRequest {
                workdir: self.snapshots.paths.root.clone(),
                prompt,
                log_path: Some(iter_paths.agent_log_path.clone()),
            })?;
            info!(exit_code = run.exit.code(), "agent exited");

            let commit_after = self.progress.current_marker();
            let progressed = commit_before != commit_after;
            let new_commits = match (&commit_before, &commit_after) {
                _ if !progressed => 0,
                (Some(before), Some(after)) => self.progress.count_between(before, after),
                _ => 1,
            };

            let (next, mut decision) = decide(
                breaker,
                IterationSignals {
                    iteration,
                    exit: run.exit,
                    progressed,
                    feedback_pending: pending_feedback.is_some(),
                },
                limits,
            );
            breaker = next;

            if progressed {
                info!(
                    new_commits,
                    commit = %commit_after.as_deref().map_or("unknown", short),
                    "progress detected"
                );
            } else {
                warn!(
                    no_progress = breaker.no_progress_count,
                    max_no_progress = limits.max_no_progress,
                    "no git commit detected"
                );
            }

            let mut archived_feedback = None;
            if let Decision::Continue {
                archive_feedback,
                retrying,
            } = decision
            {
                if retrying {
                    warn!(
                        consecutive_failures = breaker.consecutive_failures,
                        max_consecutive_failures = limits.max_consecutive_failures,
                        "iteration failed, retrying"
                    );
                }
                if archive_feedback {
                    archived_feedback = self.archive_feedback();
                }
                if is_checkpoint(iteration, config.checkpoint_interval) {
                    decision = Decision::Stop(LoopStop::Checkpoint {
                        iteration,
                        number: checkpoint_number(iteration, config.checkpoint_interval),
                    });
                }
            }

            let meta = IterationMeta {
                run_id: self.run_id.clone(),
                iteration,
                exit_code: run.exit.code(),
                commit_before: commit_before.clone(),
                commit_after: commit_after.clone(),
                new_commits,
                decision: decision_label(&decision).to_string(),
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            };
            if let Err(err) = write_meta(&iter_paths, &meta) {
                warn!(error = %format!("{err:#}"), "could not write iteration log");
            }

            on_iteration(&IterationReport {
                run_id: self.run_id.clone(),
                iteration,
                exit: run.exit,
                commit_before,
                commit_after,
                new_commits,
                breaker,
                decision: decision.clone(),
                archived_feedback,
            });
            debug!(decision = decision_label(&decision), "iteration finished");

            if let Decision::Stop(stop) = decision {
                write_final_snapshot(&mut self.snapshots, &stop, iteration, &tasks, &run.output_tail)?;
                return Ok((iteration, stop));
            }

            let last_output = if run.output_tail.is_empty() {
                format!("Iteration {iteration} finished (exit code {})", run.exit.code())
            } else {
                run.output_tail
            };
            self.snapshots.write(
                RunStatus::Running,
                iteration,
                &tasks.description,
                TaskStatus::InProgress,
                &last_output,
            )?;

            if iteration < config.max_iterations {
                thread::sleep(config.iteration_pause());
            }
        }

        if let Some(counts) = task_view(&self.mode).counts {
            info!(
                completed = counts.completed,
                pending = counts.pending,
                "max iterations statistics"
            );
        }
        self.snapshots.write(
            RunStatus::Stopped,
            config.max_iterations,
            "Max iterations reached",
            TaskStatus::Pending,
            "Maximum iterations reached - human review required",
        )?;
        Ok((
            config.max_iterations,
            LoopStop::MaxIterations {
                max_iterations: config.max_iterations,
            },
        ))
    }

    fn archive_feedback(&self) -> Option<PathBuf> {
        match self.feedback.archive() {
            Ok(Some(path)) => {
                info!(archive = %path.display(), "feedback processed and archived");
                Some(path)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not archive feedback");
                None
            }
        }
    }
}

fn write_final_snapshot(
    snapshots: &mut Snapshots<'_>,
    stop: &LoopStop,
    iteration: u32,
    tasks: &TaskView,
    output_tail: &str,
) -> Result<()> {
    let (task_status, message) = match stop {
        LoopStop::Complete { .. } => (TaskStatus::Completed, "Project complete".to_string()),
        LoopStop::Checkpoint { number, .. } => {
            if let Some(counts) = tasks.counts {
                info!(
                    iterations_completed = iteration,
                    completed = counts.completed,
                    pending = counts.pending,
                    "checkpoint progress summary"
                );
            }
            (
                TaskStatus::Pending,
                format!("Checkpoint {number} - paused for review"),
            )
        }
        other => {
            let mut message = format!("Stopped: {other}");
            if !output_tail.is_empty() {
                message.push_str("\n\n");
                message.push_str(output_tail);
            }
            (TaskStatus::Error, message)
        }
    };
    snapshots.write(
        RunStatus::Stopped,
        iteration,
        &tasks.description,
        task_status,
        &message,
    )
}

fn short(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::feedback::{FeedbackPriority, FeedbackType};
    use crate::io::init::{InitOptions, init_workflow};
    use crate::io::run_state::load_state;
    use crate::test_support::{MemoryProgress, ScriptedAgent};

    fn setup() -> (tempfile::TempDir, SteerPaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        let (paths, _) = init_workflow(temp.path(), &InitOptions { force: false }).expect("init");
        (temp, paths)
    }

    fn config(max_iterations: u32) -> RunnerConfig {
        RunnerConfig {
            max_iterations,
            iteration_pause_secs: 0,
            ..RunnerConfig::default()
        }
    }

    fn final_state(paths: &SteerPaths) -> RunState {
        load_state(&paths.state_path).expect("state written")
    }

    /// Three consecutive failures escalate after the third call, never a fourth.
    #[test]
    fn escalates_after_consecutive_failures() {
        let (_temp, paths) = setup();
        let agent = ScriptedAgent::new(vec![1, 1, 1, 1]);
        let progress = MemoryProgress::default();

        let outcome =
            run_loop(&paths, &config(10), &agent, &progress, |_| {}).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Escalated {
                consecutive_failures: 3
            }
        );
        assert_eq!(agent.calls(), 3);
        assert_eq!(outcome.stop.exit_code(), 1);
        let state = final_state(&paths);
        assert_eq!(state.status, RunStatus::Stopped);
        assert_eq!(state.current_task.status, TaskStatus::Error);
    }

    /// Failures interleaved with successes never accumulate.
    #[test]
    fn success_resets_failure_counter() {
        let (_temp, paths) = setup();
        let agent = ScriptedAgent::new(vec![1, 1, 0, 1, 1, 0]).committing();
        let progress = agent.progress();

        let outcome =
            run_loop(&paths, &config(6), &agent, &progress, |_| {}).expect("loop");
        assert_eq!(outcome.stop, LoopStop::MaxIterations { max_iterations: 6 });
        assert_eq!(agent.calls(), 6);
    }

    /// Successful iterations without commits trip the breaker on the third.
    #[test]
    fn circuit_breaker_trips_without_commits() {
        let (_temp, paths) = setup();
        let agent = ScriptedAgent::new(vec![0; 5]);
        let progress = MemoryProgress::default();
        let mut seen = Vec::new();

        let outcome = run_loop(&paths, &config(10), &agent, &progress, |r| {
            seen.push(r.breaker.no_progress_count);
        })
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::CircuitBreaker { no_progress: 3 });
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(agent.calls(), 3);
        assert_eq!(final_state(&paths).status, RunStatus::Stopped);
    }

    #[test]
    fn complete_exit_stops_with_success_regardless_of_progress() {
        let (_temp, paths) = setup();
        let agent = ScriptedAgent::new(vec![0, 0, 99]);
        let progress = MemoryProgress::default();

        let outcome =
            run_loop(&paths, &config(10), &agent, &progress, |_| {}).expect("loop");

        assert_eq!(outcome.stop, LoopStop::Complete { iteration: 3 });
        assert_eq!(outcome.stop.exit_code(), 0);
        assert_eq!(final_state(&paths).current_task.status, TaskStatus::Completed);
    }

    #[test]
    fn unknown_exit_code_is_fatal() {
        let (_temp, paths) = setup();
        let agent = ScriptedAgent::new(vec![42, 0]).committing();
        let progress = agent.progress();

        let outcome =
            run_loop(&paths, &config(10), &agent, &progress, |_| {}).expect("loop");
        assert_eq!(outcome.stop, LoopStop::UnknownExit { code: 42 });
        assert_eq!(outcome.stop.exit_code(), 42);
        assert_eq!(agent.calls(), 1);
    }

    /// With interval 10 the loop pauses once, at iteration 10.
    #[test]
    fn checkpoint_pauses_for_review() {
        let (_temp, paths) = setup();
        let agent = ScriptedAgent::new(vec![0; 20]).committing();
        let progress = agent.progress();

        let outcome =
            run_loop(&paths, &config(50), &agent, &progress, |_| {}).expect("loop");

        assert_eq!(
            outcome.stop,
            LoopStop::Checkpoint {
                iteration: 10,
                number: 1
            }
        );
        assert_eq!(outcome.iterations_run, 10);
        assert_eq!(outcome.stop.exit_code(), 2);
        let state = final_state(&paths);
        assert_eq!(state.status, RunStatus::Stopped);
        assert_eq!(state.current_task.status, TaskStatus::Pending);
        assert_eq!(state.iteration.current, 10);
    }

    #[test]
    fn max_iterations_pauses() {
        let (_temp, paths) = setup();
        let agent = ScriptedAgent::new(vec![0; 3]).committing();
        let progress = agent.progress();

        let outcome =
            run_loop(&paths, &config(3), &agent, &progress, |_| {}).expect("loop");
        assert_eq!(outcome.stop, LoopStop::MaxIterations { max_iterations: 3 });
        assert_eq!(outcome.stop.exit_code(), 2);
        assert_eq!(final_state(&paths).current_task.description, "Max iterations reached");
    }

    /// The stop sentinel is consumed before the agent runs; pending feedback
    /// is left for the next run.
    #[test]
    fn stop_sentinel_exits_before_invoking_agent() {
        let (_temp, paths) = setup();
        fs::write(&paths.stop_path, "").expect("write stop");
        let store = FeedbackStore::new(&paths);
        store
            .post("Keep this", FeedbackPriority::Low, FeedbackType::Feedback)
            .expect("post");
        let agent = ScriptedAgent::new(vec![0]);
        let progress = MemoryProgress::default();

        let outcome =
            run_loop(&paths, &config(10), &agent, &progress, |_| {}).expect("loop");

        assert_eq!(outcome.stop, LoopStop::StopRequested { iteration: 1 });
        assert_eq!(outcome.stop.exit_code(), 0);
        assert_eq!(agent.calls(), 0);
        assert!(!paths.stop_path.exists());
        assert!(store.has_pending());
    }

    /// Feedback is archived only by a successful iteration that committed.
    #[test]
    fn feedback_archived_after_committed_success() {
        let (_temp, paths) = setup();
        let store = FeedbackStore::new(&paths);
        store
            .post("Add dark mode", FeedbackPriority::High, FeedbackType::Feature)
            .expect("post");

        let agent = ScriptedAgent::new(vec![1, 0, 99]).committing();
        let progress = agent.progress();
        let mut archived = Vec::new();

        run_loop(&paths, &config(10), &agent, &progress, |r| {
            archived.push(r.archived_feedback.is_some());
        })
        .expect("loop");

        assert_eq!(archived, vec![false, true, false]);
        assert!(!store.has_pending());
        assert!(agent.prompts()[0].contains("Add dark mode"));
        assert!(!agent.prompts()[2].contains("Add dark mode"));
    }

    /// A successful iteration without a commit keeps feedback pending.
    #[test]
    fn feedback_stays_pending_without_commit() {
        let (_temp, paths) = setup();
        let store = FeedbackStore::new(&paths);
        store
            .post("Add dark mode", FeedbackPriority::High, FeedbackType::Feature)
            .expect("post");

        let agent = ScriptedAgent::new(vec![0, 99]);
        let progress = MemoryProgress::default();
        let mut archived = Vec::new();

        let outcome = run_loop(&paths, &config(10), &agent, &progress, |r| {
            archived.push(r.archived_feedback.is_some());
        })
        .expect("loop");

        assert_eq!(outcome.stop, LoopStop::Complete { iteration: 2 });
        assert_eq!(archived, vec![false, false]);
        assert!(store.has_pending());
        assert!(agent.prompts()[1].contains("Add dark mode"));
    }

    /// A runner-side error mid-run leaves an error snapshot at that iteration.
    #[test]
    fn runner_error_snapshot_records_iteration() {
        let (_temp, paths) = setup();
        // Exhausted after one call, so the second invocation returns `Err`.
        let agent = ScriptedAgent::new(vec![0]).committing();
        let progress = agent.progress();

        let err = run_loop(&paths, &config(5), &agent, &progress, |_| {}).unwrap_err();
        assert!(err.to_string().contains("exhausted"));

        let state = final_state(&paths);
        assert_eq!(state.status, RunStatus::Error);
        assert_eq!(state.iteration.current, 2);
        assert_eq!(state.current_task.status, TaskStatus::Error);
    }

    #[test]
    fn missing_steering_document_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SteerPaths::new(temp.path());
        let agent = ScriptedAgent::new(vec![0]);
        let err = run_loop(&paths, &config(1), &agent, &MemoryProgress::default(), |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("steering document not found"));
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn iteration_meta_is_recorded() {
        let (_temp, paths) = setup();
        let agent = ScriptedAgent::new(vec![0, 99]).committing();
        let progress = agent.progress();

        let outcome =
            run_loop(&paths, &config(10), &agent, &progress, |_| {}).expect("loop");

        let meta_path = IterationPaths::new(&paths.iterations_dir, &outcome.run_id, 1).meta_path;
        let meta = crate::io::iteration_log::read_meta(&meta_path).expect("meta");
        assert_eq!(meta.exit_code, 0);
        assert_eq!(meta.new_commits, 1);
        assert_eq!(meta.decision, "continue");
    }
}
