//! `steer`: steer-driven autonomous development loop.
//!
//! Drives an external coding agent iteration by iteration, using git commits
//! as the progress signal and `.spec-workflow/` as the shared state directory.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use steer_runner::controller::{IterationReport, decision_label, run_loop};
use steer_runner::core::types::{LoopOutcome, LoopStop};
use steer_runner::exit_codes;
use steer_runner::io::agent::CodexAgent;
use steer_runner::io::config::{
    ConfigOverrides, RunnerConfig, resolve_config, resolve_project_root,
};
use steer_runner::io::feedback::{FeedbackPriority, FeedbackStore, FeedbackType};
use steer_runner::io::git::Git;
use steer_runner::io::init::{InitOptions, SteerPaths, init_workflow};
use steer_runner::io::run_state::StateStore;
use steer_runner::logging;

#[derive(Parser)]
#[command(
    name = "steer",
    version,
    about = "Steer-driven autonomous development loop runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autonomous development loop.
    ///
    /// The iteration counter restarts at 0 on every invocation: the iteration
    /// limit counts iterations since the last manual restart.
    Run {
        /// Maximum iterations for this invocation.
        #[arg(short = 'i', long)]
        max_iterations: Option<u32>,
        /// Pause for human review every N iterations.
        #[arg(short = 'c', long)]
        checkpoint_interval: Option<u32>,
        /// Spec name (task-driven mode when its tasks.md exists).
        #[arg(short = 's', long)]
        spec_name: Option<String>,
        /// Agent model.
        #[arg(short = 'm', long)]
        model: Option<String>,
        /// Project root (default: STEER_PROJECT_ROOT or the current directory).
        #[arg(short = 'p', long)]
        project_root: Option<PathBuf>,
    },
    /// Post async feedback for the agent, or clear pending feedback.
    Feedback {
        /// Feedback message.
        #[arg(required_unless_present = "clear")]
        message: Option<String>,
        /// LOW, MEDIUM, HIGH or CRITICAL.
        #[arg(short = 'p', long, default_value = "MEDIUM")]
        priority: FeedbackPriority,
        /// FEEDBACK, BUG, FEATURE, IMPROVEMENT or VISUAL.
        #[arg(short = 't', long = "type", default_value = "FEEDBACK")]
        kind: FeedbackType,
        /// Remove pending feedback without archiving it.
        #[arg(long, conflicts_with = "message")]
        clear: bool,
        /// Project root (default: STEER_PROJECT_ROOT or the current directory).
        #[arg(long)]
        project_root: Option<PathBuf>,
    },
    /// Create `.spec-workflow/` scaffolding and steering templates.
    Init {
        /// Project root (default: STEER_PROJECT_ROOT or the current directory).
        #[arg(short = 'p', long)]
        project_root: Option<PathBuf>,
        /// Overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the current run state snapshot as JSON.
    Status {
        /// Project root (default: STEER_PROJECT_ROOT or the current directory).
        #[arg(short = 'p', long)]
        project_root: Option<PathBuf>,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::FAILURE);
        }
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            max_iterations,
            checkpoint_interval,
            spec_name,
            model,
            project_root,
        } => cmd_run(
            project_root,
            &ConfigOverrides {
                max_iterations,
                checkpoint_interval,
                spec_name,
                agent_model: model,
                monitor_refresh_secs: None,
            },
        ),
        Command::Feedback {
            message,
            priority,
            kind,
            clear,
            project_root,
        } => cmd_feedback(project_root, message, priority, kind, clear),
        Command::Init {
            project_root,
            force,
        } => cmd_init(project_root, force),
        Command::Status { project_root } => cmd_status(project_root),
    }
}

fn cmd_run(project_root: Option<PathBuf>, overrides: &ConfigOverrides) -> Result<i32> {
    let root = resolve_project_root(project_root, env_lookup)?;
    let paths = SteerPaths::new(&root);
    logging::init("info", Some(&paths.log_path))?;

    let config = resolve_config(&paths, overrides, env_lookup)?;
    print_start_banner(&paths, &config);

    let agent = CodexAgent::from_config(&config);
    let progress = Git::new(&root);
    let outcome = run_loop(&paths, &config, &agent, &progress, print_iteration)?;
    print_outcome(&outcome, &config);
    Ok(outcome.stop.exit_code())
}

fn cmd_feedback(
    project_root: Option<PathBuf>,
    message: Option<String>,
    priority: FeedbackPriority,
    kind: FeedbackType,
    clear: bool,
) -> Result<i32> {
    logging::init("warn", None)?;
    let root = resolve_project_root(project_root, env_lookup)?;
    let store = FeedbackStore::new(&SteerPaths::new(root));

    if clear {
        if store.clear()? {
            println!("Pending feedback cleared.");
        } else {
            println!("No pending feedback.");
        }
        return Ok(exit_codes::OK);
    }

    let message = message.unwrap_or_default();
    let path = store.post(&message, priority, kind)?;
    println!("Feedback posted to {}", path.display());
    println!("  Priority: {priority}");
    println!("  Type: {kind}");
    println!("The agent will consider it in the next iteration.");
    Ok(exit_codes::OK)
}

fn cmd_init(project_root: Option<PathBuf>, force: bool) -> Result<i32> {
    logging::init("warn", None)?;
    let root = resolve_project_root(project_root, env_lookup)?;
    let (paths, report) = init_workflow(&root, &InitOptions { force })?;
    for path in &report.created {
        println!("created {}", path.display());
    }
    for path in &report.skipped {
        println!("kept    {}", path.display());
    }
    println!();
    println!("Next steps:");
    println!("  1. Edit {}", paths.product_path.display());
    println!("  2. Run `steer run`");
    println!("  3. Watch progress with `steer-monitor`");
    Ok(exit_codes::OK)
}

fn cmd_status(project_root: Option<PathBuf>) -> Result<i32> {
    logging::init("warn", None)?;
    let root = resolve_project_root(project_root, env_lookup)?;
    let paths = SteerPaths::new(root);
    let config = resolve_config(&paths, &ConfigOverrides::default(), env_lookup)?;
    let state = StateStore::new(&paths.state_path).load_or_waiting(config.max_iterations);
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(exit_codes::OK)
}

const RULE: &str = "============================================================";

fn print_start_banner(paths: &SteerPaths, config: &RunnerConfig) {
    println!("{RULE}");
    println!("  Steer-driven autonomous development");
    println!("{RULE}");
    println!("  Project:     {}", paths.root.display());
    println!("  Mode:        {}", config.run_mode(paths).describe());
    println!("  Model:       {}", config.agent_model);
    println!("  Iterations:  {}", config.max_iterations);
    println!("  Checkpoint:  every {} iterations", config.checkpoint_interval);
    println!("  Stop:        touch {}", paths.stop_path.display());
    println!();
}

fn print_iteration(report: &IterationReport) {
    println!(
        "-- iteration {}: exit {} | {} new commit(s) | {}",
        report.iteration,
        report.exit.code(),
        report.new_commits,
        decision_label(&report.decision)
    );
}

fn print_outcome(outcome: &LoopOutcome, config: &RunnerConfig) {
    let (title, detail) = match &outcome.stop {
        LoopStop::StopRequested { .. } => ("STOP REQUESTED", "Exited gracefully.".to_string()),
        LoopStop::Complete { .. } => (
            "PROJECT COMPLETE",
            "The agent reported all work finished.".to_string(),
        ),
        LoopStop::Escalated {
            consecutive_failures,
        } => (
            "ESCALATION REQUIRED",
            format!("{consecutive_failures} consecutive failed iterations. Human intervention needed."),
        ),
        LoopStop::CircuitBreaker { no_progress } => (
            "CIRCUIT BREAKER TRIGGERED",
            format!("No commits for {no_progress} iterations. Human intervention needed."),
        ),
        LoopStop::UnknownExit { code } => (
            "UNKNOWN EXIT CODE",
            format!("The agent exited with {code}. Stopping."),
        ),
        LoopStop::Checkpoint { number, .. } => (
            "CHECKPOINT REACHED",
            format!("Checkpoint {number}: paused for human review. Run `steer run` to continue."),
        ),
        LoopStop::MaxIterations { .. } => (
            "MAX ITERATIONS REACHED",
            format!(
                "{} iterations done. Human review required before continuing.",
                config.max_iterations
            ),
        ),
    };
    println!();
    println!("{RULE}");
    println!("  {title}");
    println!("  {detail}");
    println!("  Iterations run: {} ({})", outcome.iterations_run, outcome.run_id);
    println!("{RULE}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_flags() {
        let cli = Cli::parse_from(["steer", "run", "-i", "100", "-c", "5", "-s", "auth"]);
        match cli.command {
            Command::Run {
                max_iterations,
                checkpoint_interval,
                spec_name,
                ..
            } => {
                assert_eq!(max_iterations, Some(100));
                assert_eq!(checkpoint_interval, Some(5));
                assert_eq!(spec_name.as_deref(), Some("auth"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_feedback_priority_and_type() {
        let cli = Cli::parse_from(["steer", "feedback", "Fix it", "-p", "high", "-t", "BUG"]);
        match cli.command {
            Command::Feedback {
                message,
                priority,
                kind,
                clear,
                ..
            } => {
                assert_eq!(message.as_deref(), Some("Fix it"));
                assert_eq!(priority, FeedbackPriority::High);
                assert_eq!(kind, FeedbackType::Bug);
                assert!(!clear);
            }
            _ => panic!("expected feedback"),
        }
    }

    #[test]
    fn feedback_requires_message_unless_clearing() {
        assert!(Cli::try_parse_from(["steer", "feedback"]).is_err());
        assert!(Cli::try_parse_from(["steer", "feedback", "--clear"]).is_ok());
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["steer", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true, .. }));
    }
}
