//! Tracing setup for the `steer` binary.
//!
//! - **Tracing (this module)**: diagnostics filtered by `RUST_LOG`, written to
//!   stderr and appended to `<root>/autonomous-dev.log`.
//! - **Iteration logging (`io/iteration_log`)**: per-iteration artifacts in
//!   `.spec-workflow/monitor/iterations/`. Always written, unaffected by `RUST_LOG`.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_filter` if unset. When `log_file`
/// is given, events are also appended there without ANSI colors.
///
/// # Example
/// ```bash
/// RUST_LOG=steer_runner=debug steer run -i 5
/// ```
pub fn init(default_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = match log_file {
        Some(path) => {
            let file = open_log(path)?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(file_layer)
        .try_init()
        .context("install tracing subscriber")?;
    Ok(())
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}
