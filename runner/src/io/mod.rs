//! Side-effecting helpers: filesystem state, git, and agent subprocesses.

pub mod agent;
pub mod config;
pub mod feedback;
pub mod git;
pub mod init;
pub mod iteration_log;
pub mod process;
pub mod prompt;
pub mod run_state;
pub mod stop;
