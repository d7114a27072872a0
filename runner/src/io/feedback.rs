//! Async human feedback (`.spec-workflow/feedback/`).
//!
//! Humans append entries to `pending.md`; the loop surfaces the whole file in
//! the next prompt and archives it once a successful iteration commits.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use tracing::{debug, info};

use crate::io::init::SteerPaths;

/// Separator between consecutive entries in `pending.md`.
pub const ENTRY_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedbackPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl FeedbackPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for FeedbackPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!(
                "unknown priority '{other}' (expected LOW, MEDIUM, HIGH or CRITICAL)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FeedbackType {
    #[default]
    Feedback,
    Bug,
    Feature,
    Improvement,
    Visual,
}

impl FeedbackType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feedback => "FEEDBACK",
            Self::Bug => "BUG",
            Self::Feature => "FEATURE",
            Self::Improvement => "IMPROVEMENT",
            Self::Visual => "VISUAL",
        }
    }
}

impl fmt::Display for FeedbackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FEEDBACK" => Ok(Self::Feedback),
            "BUG" => Ok(Self::Bug),
            "FEATURE" => Ok(Self::Feature),
            "IMPROVEMENT" => Ok(Self::Improvement),
            "VISUAL" => Ok(Self::Visual),
            other => Err(format!(
                "unknown feedback type '{other}' (expected FEEDBACK, BUG, FEATURE, IMPROVEMENT or VISUAL)"
            )),
        }
    }
}

/// Render one pending entry (without the leading separator).
pub fn format_entry(
    message: &str,
    priority: FeedbackPriority,
    kind: FeedbackType,
    at: NaiveDateTime,
) -> String {
    format!(
        "## {message}\n\
         **Date:** {date}\n\
         **Priority:** {priority}\n\
         **Type:** {kind}\n\
         \n\
         **Description:**\n\
         {message}\n\
         \n\
         **Status:** PENDING (awaiting AI agent processing)\n\
         \n\
         **Posted by:** Human (async feedback)\n",
        date = at.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// Pending log plus its archive directory.
#[derive(Debug, Clone)]
pub struct FeedbackStore {
    pending_path: PathBuf,
    archive_dir: PathBuf,
}

impl FeedbackStore {
    pub fn new(paths: &SteerPaths) -> Self {
        Self {
            pending_path: paths.pending_feedback_path.clone(),
            archive_dir: paths.feedback_archive_dir.clone(),
        }
    }

    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    /// Append an entry to the pending log; returns the log location.
    pub fn post(
        &self,
        message: &str,
        priority: FeedbackPriority,
        kind: FeedbackType,
    ) -> Result<PathBuf> {
        self.post_at(message, priority, kind, Local::now().naive_local())
    }

    pub fn post_at(
        &self,
        message: &str,
        priority: FeedbackPriority,
        kind: FeedbackType,
        at: NaiveDateTime,
    ) -> Result<PathBuf> {
        if let Some(parent) = self.pending_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let separator = if self.has_pending() { ENTRY_SEPARATOR } else { "" };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.pending_path)
            .with_context(|| format!("open feedback {}", self.pending_path.display()))?;
        write!(
            file,
            "{separator}{}",
            format_entry(message, priority, kind, at)
        )
        .with_context(|| format!("append feedback {}", self.pending_path.display()))?;
        info!(priority = priority.as_str(), kind = kind.as_str(), "feedback posted");
        Ok(self.pending_path.clone())
    }

    pub fn has_pending(&self) -> bool {
        self.pending_path.is_file()
    }

    pub fn read_pending(&self) -> Result<Option<String>> {
        if !self.has_pending() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.pending_path)
            .with_context(|| format!("read feedback {}", self.pending_path.display()))?;
        Ok(Some(text))
    }

    /// Move the pending log to `archive/<YYYY-MM-DD-HHMMSS>.md`.
    ///
    /// Returns `None` without side effects when nothing is pending.
    pub fn archive(&self) -> Result<Option<PathBuf>> {
        self.archive_at(Local::now().naive_local())
    }

    pub fn archive_at(&self, at: NaiveDateTime) -> Result<Option<PathBuf>> {
        if !self.has_pending() {
            return Ok(None);
        }
        fs::create_dir_all(&self.archive_dir)
            .with_context(|| format!("create directory {}", self.archive_dir.display()))?;

        let stem = at.format("%Y-%m-%d-%H%M%S").to_string();
        let mut target = self.archive_dir.join(format!("{stem}.md"));
        let mut suffix = 1;
        while target.exists() {
            target = self.archive_dir.join(format!("{stem}-{suffix}.md"));
            suffix += 1;
        }
        fs::rename(&self.pending_path, &target).with_context(|| {
            format!(
                "archive feedback {} -> {}",
                self.pending_path.display(),
                target.display()
            )
        })?;
        debug!(archive = %target.display(), "feedback archived");
        Ok(Some(target))
    }

    /// Delete pending feedback without archiving. Returns true if anything was removed.
    pub fn clear(&self) -> Result<bool> {
        if !self.has_pending() {
            return Ok(false);
        }
        fs::remove_file(&self.pending_path)
            .with_context(|| format!("remove feedback {}", self.pending_path.display()))?;
        Ok(true)
    }
}
