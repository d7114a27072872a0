//! Circuit breaker and exit-code policy.
//!
//! The controller threads a [`BreakerState`] value through each iteration.
//! Transitions are pure so every policy rule can be tested without spawning
//! the agent or touching git.

use crate::core::types::{AgentExit, LoopStop};

/// Thresholds that trip the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerLimits {
    pub max_consecutive_failures: u32,
    pub max_no_progress: u32,
}

/// In-memory counters, reset on every controller start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerState {
    pub consecutive_failures: u32,
    pub no_progress_count: u32,
}

/// What the controller should do after an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Continue {
        /// Pending feedback was consumed by a committed, successful iteration.
        archive_feedback: bool,
        /// The iteration failed but the failure budget is not exhausted.
        retrying: bool,
    },
    Stop(LoopStop),
}

/// Observations from one iteration, fed to [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationSignals {
    pub iteration: u32,
    pub exit: AgentExit,
    /// The progress marker changed during the iteration.
    pub progressed: bool,
    /// Feedback was pending before the agent was invoked.
    pub feedback_pending: bool,
}

impl BreakerState {
    /// Update the no-progress counter from the before/after comparison.
    pub fn record_progress(self, progressed: bool) -> Self {
        if progressed {
            Self {
                no_progress_count: 0,
                ..self
            }
        } else {
            Self {
                no_progress_count: self.no_progress_count.saturating_add(1),
                ..self
            }
        }
    }

    /// Apply the exit-code policy to the failure counter.
    pub fn record_exit(self, exit: AgentExit) -> Self {
        match exit {
            AgentExit::Success => Self {
                consecutive_failures: 0,
                ..self
            },
            AgentExit::Failed => Self {
                consecutive_failures: self.consecutive_failures.saturating_add(1),
                ..self
            },
            AgentExit::Complete | AgentExit::Unknown(_) => self,
        }
    }
}

/// Decide the next action for one finished iteration.
///
/// Order of evaluation:
/// 1. exit code 99 stops with success regardless of the counters,
/// 2. failure escalation, when this failed iteration exhausts the budget,
/// 3. the no-progress trip,
/// 4. the rest of the exit-code policy (unknown codes, feedback archiving).
pub fn decide(
    state: BreakerState,
    signals: IterationSignals,
    limits: BreakerLimits,
) -> (BreakerState, Decision) {
    let state = state.record_progress(signals.progressed);

    if signals.exit == AgentExit::Complete {
        return (
            state,
            Decision::Stop(LoopStop::Complete {
                iteration: signals.iteration,
            }),
        );
    }

    let state = state.record_exit(signals.exit);
    if signals.exit == AgentExit::Failed
        && state.consecutive_failures >= limits.max_consecutive_failures
    {
        return (
            state,
            Decision::Stop(LoopStop::Escalated {
                consecutive_failures: state.consecutive_failures,
            }),
        );
    }

    if state.no_progress_count >= limits.max_no_progress {
        return (
            state,
            Decision::Stop(LoopStop::CircuitBreaker {
                no_progress: state.no_progress_count,
            }),
        );
    }

    let decision = match signals.exit {
        AgentExit::Success => Decision::Continue {
            archive_feedback: signals.progressed && signals.feedback_pending,
            retrying: false,
        },
        AgentExit::Failed => Decision::Continue {
            archive_feedback: false,
            retrying: true,
        },
        AgentExit::Unknown(code) => Decision::Stop(LoopStop::UnknownExit { code }),
        AgentExit::Complete => Decision::Stop(LoopStop::Complete {
            iteration: signals.iteration,
        }),
    };
    (state, decision)
}
