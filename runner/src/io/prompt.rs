//! Iteration prompt builder.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::tasks::TaskCounts;
use crate::core::types::RunMode;

const ITERATION_TEMPLATE: &str = include_str!("prompts/iteration.md");

/// Everything the iteration prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub iteration: u32,
    pub max_iterations: u32,
    pub mode: &'a RunMode,
    /// Task tallies, task-driven mode only.
    pub tasks: Option<TaskCounts>,
    pub current_task: Option<&'a str>,
    /// Verbatim contents of `pending.md`.
    pub feedback: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct TaskContext {
    pending: u32,
    in_progress: u32,
    completed: u32,
}

impl From<TaskCounts> for TaskContext {
    fn from(counts: TaskCounts) -> Self {
        Self {
            pending: counts.pending,
            in_progress: counts.in_progress,
            completed: counts.completed,
        }
    }
}

/// Render the prompt passed to the agent for one iteration.
pub fn build_prompt(input: &PromptInputs<'_>) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("iteration", ITERATION_TEMPLATE)
        .context("load iteration template")?;
    let template = env
        .get_template("iteration")
        .context("get iteration template")?;
    let rendered = template
        .render(context! {
            iteration => input.iteration,
            max_iterations => input.max_iterations,
            mode => input.mode.describe(),
            tasks => input.tasks.map(TaskContext::from),
            current_task => input.current_task,
            feedback => input.feedback.map(str::trim).filter(|s| !s.is_empty()),
        })
        .context("render iteration prompt")?;
    debug!(bytes = rendered.len(), "built iteration prompt");
    Ok(rendered)
}
