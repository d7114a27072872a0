//! Shared deterministic types for runner core logic.
//!
//! These types define stable contracts between the controller and its
//! collaborators. They must not depend on external state or I/O.

use std::fmt;
use std::path::PathBuf;

use crate::exit_codes;

/// Agent exit code meaning "iteration succeeded".
pub const AGENT_SUCCESS: i32 = 0;
/// Agent exit code meaning "iteration failed, retry".
pub const AGENT_FAILED: i32 = 1;
/// Agent exit code meaning "the whole project is complete".
pub const AGENT_COMPLETE: i32 = 99;

/// Classified agent exit code.
///
/// Exit codes are contract values: anything outside `0`, `1` and `99` is
/// treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    Success,
    Complete,
    Failed,
    Unknown(i32),
}

impl AgentExit {
    pub fn from_code(code: i32) -> Self {
        match code {
            AGENT_SUCCESS => Self::Success,
            AGENT_COMPLETE => Self::Complete,
            AGENT_FAILED => Self::Failed,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Success => AGENT_SUCCESS,
            Self::Complete => AGENT_COMPLETE,
            Self::Failed => AGENT_FAILED,
            Self::Unknown(code) => code,
        }
    }
}

/// How the agent is steered for this run. Computed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// No task list: the agent works directly from the steering documents.
    SteeringDriven,
    /// A spec with a `tasks.md` drives the agent.
    TaskDriven {
        spec_name: String,
        tasks_file: PathBuf,
    },
}

impl RunMode {
    pub fn is_steering_driven(&self) -> bool {
        matches!(self, Self::SteeringDriven)
    }

    /// One-line description used in prompts and banners.
    pub fn describe(&self) -> String {
        match self {
            Self::SteeringDriven => {
                "Steering-driven (working from product.md directly)".to_string()
            }
            Self::TaskDriven { spec_name, .. } => format!("Task-driven (spec: {spec_name})"),
        }
    }
}

/// Reason why the iteration loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The stop sentinel was found and consumed.
    StopRequested { iteration: u32 },
    /// The agent reported the project as complete (exit code 99).
    Complete { iteration: u32 },
    /// Too many consecutive failed iterations.
    Escalated { consecutive_failures: u32 },
    /// Too many iterations without a new commit.
    CircuitBreaker { no_progress: u32 },
    /// The agent exited with a code outside the contract.
    UnknownExit { code: i32 },
    /// Scheduled pause for human review.
    Checkpoint { iteration: u32, number: u32 },
    /// `max_iterations` reached for this invocation.
    MaxIterations { max_iterations: u32 },
}

impl LoopStop {
    /// Process exit code callers can depend on.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::StopRequested { .. } | Self::Complete { .. } => exit_codes::OK,
            Self::Escalated { .. } | Self::CircuitBreaker { .. } => exit_codes::FAILURE,
            Self::UnknownExit { code } if (1..=255).contains(code) => *code,
            Self::UnknownExit { .. } => exit_codes::FAILURE,
            Self::Checkpoint { .. } | Self::MaxIterations { .. } => exit_codes::PAUSED,
        }
    }

    /// True for outcomes that indicate the agent is stuck or broken.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Escalated { .. } | Self::CircuitBreaker { .. } | Self::UnknownExit { .. }
        )
    }
}

impl fmt::Display for LoopStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopRequested { iteration } => {
                write!(f, "stop requested at iteration {iteration}")
            }
            Self::Complete { iteration } => write!(f, "project complete at iteration {iteration}"),
            Self::Escalated {
                consecutive_failures,
            } => write!(f, "escalated after {consecutive_failures} consecutive failures"),
            Self::CircuitBreaker { no_progress } => write!(
                f,
                "circuit breaker tripped after {no_progress} iterations without a commit"
            ),
            Self::UnknownExit { code } => write!(f, "unknown agent exit code {code}"),
            Self::Checkpoint { iteration, number } => {
                write!(f, "checkpoint {number} reached at iteration {iteration}")
            }
            Self::MaxIterations { max_iterations } => {
                write!(f, "max iterations ({max_iterations}) reached")
            }
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub iterations_run: u32,
    pub stop: LoopStop,
}
