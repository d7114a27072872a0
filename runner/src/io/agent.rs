//! Agent abstraction for iteration invocation.
//!
//! The [`Agent`] trait decouples the controller from the actual agent backend
//! (currently `codex e`). Tests use scripted agents that return predetermined
//! exit codes without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::core::types::AgentExit;
use crate::io::config::RunnerConfig;
use crate::io::process::{SpawnError, StreamOptions, run_command_streamed};

/// Bytes of combined agent output kept as the iteration's `last_output`.
pub const OUTPUT_TAIL_BYTES: usize = 4000;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory for the agent process (the project root).
    pub workdir: PathBuf,
    /// Prompt passed as the final argument.
    pub prompt: String,
    /// Streamed stdout/stderr log for this iteration, if any.
    pub log_path: Option<PathBuf>,
}

/// Result of one invocation. Exit code is the sole feedback channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRun {
    pub exit: AgentExit,
    /// Tail of the agent's combined output (may be empty).
    pub output_tail: String,
}

impl AgentRun {
    pub fn from_code(code: i32) -> Self {
        Self {
            exit: AgentExit::from_code(code),
            output_tail: String::new(),
        }
    }
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Run the agent once.
    ///
    /// Failures to launch or a timeout are reported as a failed iteration, not
    /// as `Err`; `Err` is reserved for runner-side I/O problems such as an
    /// unwritable iteration log.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun>;
}

/// Agent that spawns `<agent_cmd> e ...` (Codex CLI).
#[derive(Debug, Clone)]
pub struct CodexAgent {
    pub program: String,
    pub model: String,
    pub flags: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout: Option<Duration>,
    pub output_limit_bytes: usize,
    /// Echo agent stdout to the terminal while it runs.
    pub echo: bool,
}

impl CodexAgent {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            program: config.agent_cmd.clone(),
            model: config.agent_model.clone(),
            flags: config.agent_flag_args(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.agent_timeout(),
            output_limit_bytes: config.agent_output_limit_bytes,
            echo: true,
        }
    }

    /// Arguments after the program name.
    pub fn args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec!["e".to_string()];
        args.extend(self.flags.iter().cloned());
        args.push("--model".to_string());
        args.push(self.model.clone());
        args.push("-c".to_string());
        args.push(format!("max_tokens={}", self.max_tokens));
        args.push("-c".to_string());
        args.push(format!("temperature={}", self.temperature));
        args.push(prompt.to_string());
        args
    }
}

impl Agent for CodexAgent {
    #[instrument(skip_all, fields(program = %self.program, model = %self.model))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        info!(workdir = %request.workdir.display(), "starting agent");

        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(&request.prompt))
            .current_dir(&request.workdir);

        let output = match run_command_streamed(
            cmd,
            StreamOptions {
                timeout: self.timeout,
                output_limit_bytes: self.output_limit_bytes,
                log_path: request.log_path.as_deref(),
                echo: self.echo,
            },
        ) {
            Ok(output) => output,
            Err(err) if err.downcast_ref::<SpawnError>().is_some() => {
                warn!(error = %format!("{err:#}"), "agent could not be launched, counting as failed iteration");
                return Ok(AgentRun {
                    exit: AgentExit::Failed,
                    output_tail: format!("Error: {err:#}"),
                });
            }
            Err(err) => return Err(err.context("run agent")),
        };

        let tail = output_tail(&output.combined_text(), OUTPUT_TAIL_BYTES);
        if output.timed_out {
            warn!(timeout_secs = ?self.timeout.map(|t| t.as_secs()), "agent timed out");
            return Ok(AgentRun {
                exit: AgentExit::Failed,
                output_tail: tail,
            });
        }

        let exit = match output.status.code() {
            Some(code) => AgentExit::from_code(code),
            // Killed by a signal.
            None => AgentExit::Unknown(-1),
        };
        debug!(exit_code = exit.code(), "agent finished");
        Ok(AgentRun {
            exit,
            output_tail: tail,
        })
    }
}

/// Last `max_bytes` of `text`, cut on a char boundary.
pub fn output_tail(text: &str, max_bytes: usize) -> String {
    let trimmed = text.trim_end();
    if trimmed.len() <= max_bytes {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max_bytes;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
