//! Git adapter for progress detection.
//!
//! Progress is measured by comparing `HEAD` before and after each agent run.
//! Git being missing or the root not being a repository is never fatal: the
//! marker is simply absent.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Source of progress markers consulted by the controller.
pub trait ProgressSource {
    /// Opaque revision identifier, or `None` when unavailable.
    fn current_marker(&self) -> Option<String>;

    /// Number of new revisions in `before..after`; 1 when it cannot be computed.
    fn count_between(&self, before: &str, after: &str) -> u32;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Full SHA of `HEAD`, or `None` outside a repository or before the first commit.
    pub fn head(&self) -> Option<String> {
        match self.run_capture(&["rev-parse", "HEAD"]) {
            Ok(out) => {
                let sha = out.trim().to_string();
                (!sha.is_empty()).then_some(sha)
            }
            Err(err) => {
                debug!(error = %format!("{err:#}"), "no HEAD available");
                None
            }
        }
    }

    /// `git rev-list before..after --count`.
    #[instrument(skip_all)]
    pub fn rev_count(&self, before: &str, after: &str) -> Result<u32> {
        let range = format!("{before}..{after}");
        let out = self.run_capture(&["rev-list", &range, "--count"])?;
        out.trim()
            .parse::<u32>()
            .with_context(|| format!("parse rev-list count '{}'", out.trim()))
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl ProgressSource for Git {
    fn current_marker(&self) -> Option<String> {
        self.head()
    }

    fn count_between(&self, before: &str, after: &str) -> u32 {
        match self.rev_count(before, after) {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "could not count new commits, assuming 1");
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_is_absent_outside_a_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path().join("missing"));
        assert_eq!(git.head(), None);
    }

    #[test]
    fn count_between_defaults_to_one_on_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path());
        assert_eq!(git.count_between("deadbeef", "cafebabe"), 1);
    }
}
