//! Iteration logging helpers for `.spec-workflow/monitor/iterations/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Metadata recorded for each finished iteration (`meta.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IterationMeta {
    pub run_id: String,
    pub iteration: u32,
    pub exit_code: i32,
    pub commit_before: Option<String>,
    pub commit_after: Option<String>,
    pub new_commits: u32,
    /// Short label for the controller's decision (`continue`, `retry`, `checkpoint`, ...).
    pub decision: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub agent_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(iterations_dir: &Path, run_id: &str, iteration: u32) -> Self {
        let dir = iterations_dir.join(run_id).join(iteration.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            agent_log_path: dir.join("agent.log"),
        }
    }
}

/// Run identifier derived from the controller start time.
pub fn run_id_at(started: DateTime<Local>) -> String {
    format!("run-{}", started.format("%Y%m%d-%H%M%S"))
}

pub fn write_meta(paths: &IterationPaths, meta: &IterationMeta) -> Result<()> {
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;
    let mut buf = serde_json::to_string_pretty(meta).context("serialize iteration meta")?;
    buf.push('\n');
    fs::write(&paths.meta_path, buf)
        .with_context(|| format!("write {}", paths.meta_path.display()))
}

pub fn read_meta(path: &Path) -> Result<IterationMeta> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Recorded iterations as `(run_id, iteration)`, sorted by run then iteration.
pub fn list_iterations(iterations_dir: &Path) -> Result<Vec<(String, u32)>> {
    let mut found = Vec::new();
    if !iterations_dir.is_dir() {
        return Ok(found);
    }
    let runs = fs::read_dir(iterations_dir)
        .with_context(|| format!("read {}", iterations_dir.display()))?;
    for run in runs {
        let run = run.with_context(|| format!("read entry in {}", iterations_dir.display()))?;
        if !run.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let run_id = run.file_name().to_string_lossy().into_owned();
        let iters =
            fs::read_dir(run.path()).with_context(|| format!("read {}", run.path().display()))?;
        for iter in iters.flatten() {
            if let Ok(n) = iter.file_name().to_string_lossy().parse::<u32>() {
                found.push((run_id.clone(), n));
            }
        }
    }
    found.sort();
    Ok(found)
}
