//! Steer-driven autonomous development loop.
//!
//! Drives an external coding agent in a loop, tracking progress via git
//! commits and persisting a run-state snapshot that the monitor reads.
//!
//! - **[`core`]**: Pure, deterministic logic (circuit breaker, checkpoints,
//!   task parsing). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, git, process execution).
//!   Isolated behind traits to enable scripted fakes in tests.
//!
//! [`controller`] coordinates core logic with I/O to implement `steer run`.

pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
