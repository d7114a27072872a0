//! Test-only helpers: scripted agents, in-memory progress and git fixtures.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};

use crate::core::types::AgentExit;
use crate::io::agent::{Agent, AgentRequest, AgentRun};
use crate::io::git::{Git, ProgressSource};
use crate::io::init::{InitOptions, SteerPaths, init_workflow};

/// Progress source backed by a shared revision counter.
///
/// Markers are `rev-<n>`; a fresh instance never changes.
#[derive(Debug, Clone, Default)]
pub struct MemoryProgress {
    revision: Rc<Cell<u32>>,
}

impl MemoryProgress {
    pub fn advance(&self) {
        self.revision.set(self.revision.get() + 1);
    }

    pub fn revision(&self) -> u32 {
        self.revision.get()
    }
}

impl ProgressSource for MemoryProgress {
    fn current_marker(&self) -> Option<String> {
        Some(format!("rev-{}", self.revision.get()))
    }

    fn count_between(&self, before: &str, after: &str) -> u32 {
        let parse = |m: &str| m.strip_prefix("rev-").and_then(|n| n.parse::<u32>().ok());
        match (parse(before), parse(after)) {
            (Some(b), Some(a)) if a > b => a - b,
            _ => 1,
        }
    }
}

/// Agent that replays a queue of exit codes.
///
/// With [`ScriptedAgent::committing`], every invocation also advances the
/// progress returned by [`ScriptedAgent::progress`], as if the agent committed.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    codes: RefCell<VecDeque<i32>>,
    prompts: RefCell<Vec<String>>,
    calls: Cell<u32>,
    commits: bool,
    progress: MemoryProgress,
}

impl ScriptedAgent {
    pub fn new(codes: Vec<i32>) -> Self {
        Self {
            codes: RefCell::new(codes.into()),
            ..Self::default()
        }
    }

    pub fn committing(mut self) -> Self {
        self.commits = true;
        self
    }

    /// Progress source shared with this agent.
    pub fn progress(&self) -> MemoryProgress {
        self.progress.clone()
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    /// Prompts received, in invocation order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        let code = self
            .codes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent exhausted"))?;
        self.calls.set(self.calls.get() + 1);
        self.prompts.borrow_mut().push(request.prompt.clone());
        if self.commits {
            self.progress.advance();
        }
        Ok(AgentRun {
            exit: AgentExit::from_code(code),
            output_tail: format!("scripted exit {code}"),
        })
    }
}

/// Agent that commits a file to a real git repository before exiting.
#[derive(Debug)]
pub struct GitCommitAgent {
    codes: RefCell<VecDeque<(i32, bool)>>,
}

impl GitCommitAgent {
    /// Each entry is `(exit_code, commit)`.
    pub fn new(script: Vec<(i32, bool)>) -> Self {
        Self {
            codes: RefCell::new(script.into()),
        }
    }
}

impl Agent for GitCommitAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        let (code, commit) = self
            .codes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("git commit agent exhausted"))?;
        if commit {
            let git = Git::new(&request.workdir);
            let src = request.workdir.join("src");
            fs::create_dir_all(&src).context("create src")?;
            let count = fs::read_dir(&src).context("read src")?.count();
            fs::write(src.join(format!("file{count}.rs")), "fn f() {}\n")
                .context("write source file")?;
            git.add_all()?;
            git.commit_staged(&format!("feat: iteration work {count}"))?;
        }
        Ok(AgentRun::from_code(code))
    }
}

/// Temporary git repository with `.spec-workflow/` scaffolding and one commit.
pub struct TestRepo {
    temp: tempfile::TempDir,
    paths: SteerPaths,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let root = temp.path();
        git(root, &["init", "-q"])?;
        git(root, &["config", "user.email", "steer@example.com"])?;
        git(root, &["config", "user.name", "steer test"])?;
        git(root, &["config", "commit.gpgsign", "false"])?;

        let (paths, _) = init_workflow(root, &InitOptions { force: false })?;
        let repo = Git::new(root);
        repo.add_all()?;
        repo.commit_staged("chore: init spec workflow")?;
        Ok(Self { temp, paths })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &SteerPaths {
        &self.paths
    }

    pub fn git(&self) -> Git {
        Git::new(self.path())
    }

    /// Write a spec's `tasks.md`.
    pub fn write_tasks(&self, spec_name: &str, contents: &str) -> Result<PathBuf> {
        let path = self.paths.tasks_path(spec_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

fn git(root: &Path, args: &[&str]) -> Result<()> {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !status.success() {
        return Err(anyhow!("git {} failed", args.join(" ")));
    }
    Ok(())
}
