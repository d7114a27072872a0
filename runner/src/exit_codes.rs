//! Stable exit codes for `steer` CLI commands.

/// Command succeeded, the project is complete, or a stop was requested.
pub const OK: i32 = 0;
/// Escalation, circuit breaker, invalid config/layout, or other errors.
pub const FAILURE: i32 = 1;
/// `steer run` paused for human review (checkpoint or max iterations).
pub const PAUSED: i32 = 2;
