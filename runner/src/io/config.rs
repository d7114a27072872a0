//! Runner configuration.
//!
//! Resolved once at startup with a fixed precedence:
//! CLI flag > `STEER_*` environment variable > `.spec-workflow/config.toml` > default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::breaker::BreakerLimits;
use crate::core::types::RunMode;
use crate::io::init::SteerPaths;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "STEER_";

/// Runner configuration (TOML).
///
/// Missing fields default to the values documented on each field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum iterations per invocation (default 50). Counted from 0 on every start.
    pub max_iterations: u32,

    /// Pause for human review every N iterations (default 10).
    pub checkpoint_interval: u32,

    /// Spec under `.spec-workflow/specs/` whose `tasks.md` drives the run.
    pub spec_name: Option<String>,

    /// Agent executable (default `codex`).
    pub agent_cmd: String,

    /// Model identifier passed via `--model` (default `gpt-5.1-codex`).
    pub agent_model: String,

    /// Whitespace-separated automation flags
    /// (default `--dangerously-bypass-approvals-and-sandbox`).
    pub agent_flags: String,

    /// Generation budget passed as `-c max_tokens=N` (default 4000).
    pub max_tokens: u32,

    /// Sampling temperature passed as `-c temperature=T` (default 0.7).
    pub temperature: f64,

    /// Iterations without a new commit before the circuit breaker trips (default 3).
    pub max_no_progress: u32,

    /// Consecutive failed iterations before escalation (default 3).
    pub max_consecutive_failures: u32,

    /// Sleep between iterations in seconds (default 2).
    pub iteration_pause_secs: u64,

    /// Kill the agent after this many seconds; 0 disables the timeout (default 0).
    pub agent_timeout_secs: u64,

    /// Bytes of agent stdout/stderr kept in memory per iteration (default 100000).
    pub agent_output_limit_bytes: usize,

    /// Dashboard refresh interval in seconds (default 2.0).
    pub monitor_refresh_secs: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            checkpoint_interval: 10,
            spec_name: None,
            agent_cmd: "codex".to_string(),
            agent_model: "gpt-5.1-codex".to_string(),
            agent_flags: "--dangerously-bypass-approvals-and-sandbox".to_string(),
            max_tokens: 4000,
            temperature: 0.7,
            max_no_progress: 3,
            max_consecutive_failures: 3,
            iteration_pause_secs: 2,
            agent_timeout_secs: 0,
            agent_output_limit_bytes: 100_000,
            monitor_refresh_secs: 2.0,
        }
    }
}

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub max_iterations: Option<u32>,
    pub checkpoint_interval: Option<u32>,
    pub spec_name: Option<String>,
    pub agent_model: Option<String>,
    pub monitor_refresh_secs: Option<f64>,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_interval == 0 {
            return Err(anyhow!("checkpoint_interval must be > 0"));
        }
        if self.max_no_progress == 0 {
            return Err(anyhow!("max_no_progress must be > 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be > 0"));
        }
        if self.agent_cmd.trim().is_empty() {
            return Err(anyhow!("agent_cmd must be non-empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(anyhow!("temperature must be within 0.0..=2.0"));
        }
        if self.agent_output_limit_bytes == 0 {
            return Err(anyhow!("agent_output_limit_bytes must be > 0"));
        }
        if !(self.monitor_refresh_secs > 0.0) {
            return Err(anyhow!("monitor_refresh_secs must be > 0"));
        }
        if self.spec_name.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(anyhow!("spec_name must be non-empty when set"));
        }
        Ok(())
    }

    pub fn breaker_limits(&self) -> BreakerLimits {
        BreakerLimits {
            max_consecutive_failures: self.max_consecutive_failures,
            max_no_progress: self.max_no_progress,
        }
    }

    pub fn iteration_pause(&self) -> Duration {
        Duration::from_secs(self.iteration_pause_secs)
    }

    pub fn agent_timeout(&self) -> Option<Duration> {
        (self.agent_timeout_secs > 0).then(|| Duration::from_secs(self.agent_timeout_secs))
    }

    pub fn monitor_refresh(&self) -> Duration {
        Duration::from_secs_f64(self.monitor_refresh_secs)
    }

    /// Split `agent_flags` into individual arguments.
    pub fn agent_flag_args(&self) -> Vec<String> {
        self.agent_flags
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// Resolve the run mode once: task-driven only when the spec's `tasks.md` exists.
    pub fn run_mode(&self, paths: &SteerPaths) -> RunMode {
        match &self.spec_name {
            Some(spec_name) => {
                let tasks_file = paths.tasks_path(spec_name);
                if tasks_file.is_file() {
                    RunMode::TaskDriven {
                        spec_name: spec_name.clone(),
                        tasks_file,
                    }
                } else {
                    debug!(tasks_file = %tasks_file.display(), "tasks.md missing, steering-driven");
                    RunMode::SteeringDriven
                }
            }
            None => RunMode::SteeringDriven,
        }
    }

    /// Apply `STEER_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = parse_env(&get, "MAX_ITERATIONS") {
            self.max_iterations = v;
        }
        if let Some(v) = parse_env(&get, "CHECKPOINT_INTERVAL") {
            self.checkpoint_interval = v;
        }
        if let Some(v) = get("SPEC_NAME") {
            self.spec_name = Some(v);
        }
        if let Some(v) = get("AGENT_CMD") {
            self.agent_cmd = v;
        }
        if let Some(v) = get("AGENT_MODEL") {
            self.agent_model = v;
        }
        // Flags may legitimately be cleared, so an empty value still overrides.
        if let Some(v) = lookup(&format!("{ENV_PREFIX}AGENT_FLAGS")) {
            self.agent_flags = v;
        }
        if let Some(v) = parse_env(&get, "MAX_TOKENS") {
            self.max_tokens = v;
        }
        if let Some(v) = parse_env(&get, "TEMPERATURE") {
            self.temperature = v;
        }
        if let Some(v) = parse_env(&get, "MAX_NO_PROGRESS") {
            self.max_no_progress = v;
        }
        if let Some(v) = parse_env(&get, "MAX_CONSECUTIVE_FAILURES") {
            self.max_consecutive_failures = v;
        }
        if let Some(v) = parse_env(&get, "ITERATION_PAUSE_SECS") {
            self.iteration_pause_secs = v;
        }
        if let Some(v) = parse_env(&get, "AGENT_TIMEOUT_SECS") {
            self.agent_timeout_secs = v;
        }
        if let Some(v) = parse_env(&get, "AGENT_OUTPUT_LIMIT_BYTES") {
            self.agent_output_limit_bytes = v;
        }
        if let Some(v) = parse_env(&get, "MONITOR_REFRESH_SECS") {
            self.monitor_refresh_secs = v;
        }
    }

    /// Apply CLI flag overrides (highest precedence).
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.max_iterations {
            self.max_iterations = v;
        }
        if let Some(v) = overrides.checkpoint_interval {
            self.checkpoint_interval = v;
        }
        if let Some(v) = &overrides.spec_name {
            self.spec_name = Some(v.clone());
        }
        if let Some(v) = &overrides.agent_model {
            self.agent_model = v.clone();
        }
        if let Some(v) = overrides.monitor_refresh_secs {
            self.monitor_refresh_secs = v;
        }
    }
}

fn parse_env<T, G>(get: &G, name: &str) -> Option<T>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(name)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = %format!("{ENV_PREFIX}{name}"), value = %raw, "ignoring unparseable env override");
            None
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`. Does not validate;
/// overrides may still fix invalid file values.
pub fn load_config_file(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        return Ok(RunnerConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}

/// Resolve the effective config: file, then env (`lookup`), then flags; then validate.
pub fn resolve_config<F>(
    paths: &SteerPaths,
    overrides: &ConfigOverrides,
    lookup: F,
) -> Result<RunnerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = load_config_file(&paths.config_path)?;
    cfg.apply_env_overrides(lookup);
    cfg.apply_overrides(overrides);
    cfg.validate()?;
    debug!(?cfg, "resolved config");
    Ok(cfg)
}

/// Resolve the project root: flag > `STEER_PROJECT_ROOT` > current directory.
pub fn resolve_project_root<F>(flag: Option<PathBuf>, lookup: F) -> Result<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(root) = flag {
        return Ok(root);
    }
    if let Some(root) = lookup(&format!("{ENV_PREFIX}PROJECT_ROOT")).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(root));
    }
    std::env::current_dir().context("resolve current directory")
}
