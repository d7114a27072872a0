//! Canonical `.spec-workflow/` layout and `steer init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// All canonical paths within `.spec-workflow/` for a project root.
#[derive(Debug, Clone)]
pub struct SteerPaths {
    pub root: PathBuf,
    pub workflow_dir: PathBuf,
    pub steering_dir: PathBuf,
    pub specs_dir: PathBuf,
    pub feedback_dir: PathBuf,
    pub monitor_dir: PathBuf,
    pub iterations_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub readme_path: PathBuf,
    pub config_path: PathBuf,
    pub product_path: PathBuf,
    pub design_path: PathBuf,
    pub tech_path: PathBuf,
    pub pending_feedback_path: PathBuf,
    pub feedback_archive_dir: PathBuf,
    pub state_path: PathBuf,
    pub stop_path: PathBuf,
    pub log_path: PathBuf,
}

impl SteerPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let workflow_dir = root.join(".spec-workflow");
        let steering_dir = workflow_dir.join("steering");
        let feedback_dir = workflow_dir.join("feedback");
        let monitor_dir = workflow_dir.join("monitor");
        Self {
            root: root.clone(),
            workflow_dir: workflow_dir.clone(),
            steering_dir: steering_dir.clone(),
            specs_dir: workflow_dir.join("specs"),
            feedback_dir: feedback_dir.clone(),
            monitor_dir: monitor_dir.clone(),
            iterations_dir: monitor_dir.join("iterations"),
            gitignore_path: workflow_dir.join(".gitignore"),
            readme_path: workflow_dir.join("README.md"),
            config_path: workflow_dir.join("config.toml"),
            product_path: steering_dir.join("product.md"),
            design_path: steering_dir.join("design.md"),
            tech_path: steering_dir.join("tech.md"),
            pending_feedback_path: feedback_dir.join("pending.md"),
            feedback_archive_dir: feedback_dir.join("archive"),
            state_path: monitor_dir.join("state.json"),
            stop_path: root.join("stop.txt"),
            log_path: root.join("autonomous-dev.log"),
        }
    }

    /// Directory of a named spec (`specs/<name>/`).
    pub fn spec_dir(&self, spec_name: &str) -> PathBuf {
        self.specs_dir.join(spec_name)
    }

    /// Task list of a named spec (`specs/<name>/tasks.md`).
    pub fn tasks_path(&self, spec_name: &str) -> PathBuf {
        self.spec_dir(spec_name).join("tasks.md")
    }
}

/// Options for `init_workflow`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing template files.
    pub force: bool,
}

/// Files written (or left untouched) by `init_workflow`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    pub created: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Create `.spec-workflow/` scaffolding in `root`.
///
/// Existing template files are kept unless `options.force` is set.
pub fn init_workflow(root: &Path, options: &InitOptions) -> Result<(SteerPaths, InitReport)> {
    let paths = SteerPaths::new(root);
    if paths.workflow_dir.exists() && !paths.workflow_dir.is_dir() {
        return Err(anyhow!(
            "steer init: {} exists but is not a directory",
            paths.workflow_dir.display()
        ));
    }

    for dir in [
        &paths.steering_dir,
        &paths.feedback_dir,
        &paths.monitor_dir,
    ] {
        create_dir(dir)?;
    }

    let mut report = InitReport::default();
    let templates: [(&Path, &str); 6] = [
        (paths.product_path.as_path(), PRODUCT_TEMPLATE),
        (paths.design_path.as_path(), DESIGN_TEMPLATE),
        (paths.tech_path.as_path(), TECH_TEMPLATE),
        (paths.readme_path.as_path(), README_TEMPLATE),
        (paths.gitignore_path.as_path(), WORKFLOW_GITIGNORE),
        (paths.config_path.as_path(), CONFIG_TEMPLATE),
    ];
    for (path, contents) in templates {
        if path.exists() && !options.force {
            debug!(path = %path.display(), "keeping existing file");
            report.skipped.push(path.to_path_buf());
            continue;
        }
        write_file(path, contents)?;
        report.created.push(path.to_path_buf());
    }

    Ok((paths, report))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const PRODUCT_TEMPLATE: &str = "# Product Specification\n\n## Vision\n[Describe the product vision]\n\n## Features\n- Feature 1\n- Feature 2\n\n## User Stories\n- As a user, I want to...\n";
const DESIGN_TEMPLATE: &str =
    "# Design Specification\n\n## Architecture\n[Describe the architecture]\n\n## UI/UX\n[Describe UI/UX design]\n";
const TECH_TEMPLATE: &str = "# Technical Specification\n\n## Tech Stack\n- Language: [e.g., Rust, TypeScript]\n- Framework: [e.g., axum, React]\n\n## Code Quality\n- Test coverage: >=80%\n- Linting: Enabled\n";
const README_TEMPLATE: &str = "# Spec Workflow\n\nSteering documents and workflow artifacts for autonomous AI development.\n\n## Structure\n- `steering/` - product.md, design.md, tech.md\n- `specs/<name>/tasks.md` - optional task list (task-driven mode)\n- `feedback/` - async feedback (`pending.md`, `archive/`)\n- `monitor/` - runtime state read by `steer-monitor`\n\n## Usage\n```bash\nsteer run -i 100\nsteer-monitor --terminal\nsteer feedback \"Add user authentication\"\n```\n";
const WORKFLOW_GITIGNORE: &str = "monitor/\n";
const CONFIG_TEMPLATE: &str = "# steer configuration. Environment (STEER_*) and CLI flags take precedence.\n# max_iterations = 50\n# checkpoint_interval = 10\n# agent_model = \"gpt-5.1-codex\"\n";
