//! Run state snapshot shared with the monitor (`.spec-workflow/monitor/state.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Source extensions counted by [`collect_code_metrics`].
pub const CODE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "py", "rs"];

/// Default description shown before any runner has written a snapshot.
pub const WAITING_DESCRIPTION: &str = "Waiting for autonomous runner to start...";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Waiting,
    Running,
    Stopped,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IterationInfo {
    pub current: u32,
    /// Iteration budget for the run; 0 means continuous.
    pub specified: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeMetrics {
    pub total_lines: u64,
    pub file_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentTask {
    pub description: String,
    pub status: TaskStatus,
}

/// Snapshot of the loop, overwritten (never merged) on every save.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    pub status: RunStatus,
    pub iteration: IterationInfo,
    pub code_metrics: CodeMetrics,
    pub current_task: CurrentTask,
    pub last_output: String,
    pub timestamp: DateTime<Utc>,
}

impl RunState {
    /// Placeholder shown while no runner has started.
    pub fn waiting(max_iterations: u32) -> Self {
        Self {
            status: RunStatus::Waiting,
            iteration: IterationInfo {
                current: 0,
                specified: max_iterations,
            },
            code_metrics: CodeMetrics::default(),
            current_task: CurrentTask {
                description: WAITING_DESCRIPTION.to_string(),
                status: TaskStatus::Pending,
            },
            last_output: String::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Reads and atomically writes the snapshot file.
///
/// Successive saves through one store never move `timestamp` backwards.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    last_timestamp: Option<DateTime<Utc>>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_timestamp: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically overwrite the snapshot (temp file + rename).
    ///
    /// Returns the state as written, after timestamp clamping.
    pub fn save(&mut self, state: &RunState) -> Result<RunState> {
        let mut state = state.clone();
        if let Some(last) = self.last_timestamp
            && state.timestamp < last
        {
            state.timestamp = last;
        }
        debug!(
            path = %self.path.display(),
            status = state.status.as_str(),
            iteration = state.iteration.current,
            "writing run state"
        );
        let mut buf = serde_json::to_string_pretty(&state).context("serialize run state")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)?;
        self.last_timestamp = Some(state.timestamp);
        Ok(state)
    }

    /// Load the snapshot; `None` when the file is missing or malformed.
    pub fn load(&self) -> Option<RunState> {
        load_state(&self.path)
    }

    /// Load the snapshot, substituting the waiting state when absent.
    pub fn load_or_waiting(&self, max_iterations: u32) -> RunState {
        self.load()
            .unwrap_or_else(|| RunState::waiting(max_iterations))
    }

    /// Write the waiting state if no snapshot exists yet.
    pub fn create_waiting(&mut self, max_iterations: u32) -> Result<RunState> {
        match self.load() {
            Some(existing) => Ok(existing),
            None => self.save(&RunState::waiting(max_iterations)),
        }
    }
}

/// Read a snapshot from `path` without a store. Missing or malformed files yield `None`.
pub fn load_state(path: &Path) -> Option<RunState> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "run state unavailable");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(state) => Some(state),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring malformed run state");
            None
        }
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("run state path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp run state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace run state {}", path.display()))?;
    Ok(())
}

/// Count source files and lines under `<root>/src`. Unreadable files are skipped.
pub fn collect_code_metrics(root: &Path) -> CodeMetrics {
    let src = root.join("src");
    let mut metrics = CodeMetrics::default();
    if !src.is_dir() {
        return metrics;
    }
    for entry in WalkDir::new(&src).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let counted = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| CODE_EXTENSIONS.contains(&ext));
        if !counted {
            continue;
        }
        let Ok(bytes) = fs::read(entry.path()) else {
            continue;
        };
        metrics.file_count += 1;
        metrics.total_lines += String::from_utf8_lossy(&bytes).lines().count() as u64;
    }
    metrics
}
