//! Shared application state for the monitor server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use steer_runner::io::init::SteerPaths;
use steer_runner::io::run_state::{RunState, StateStore};
use tokio::sync::broadcast;

/// Events broadcast to SSE clients when watched files change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    StateChanged,
    FeedbackChanged,
    IterationAdded { run_id: String, iter: u32 },
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// `.spec-workflow/` layout of the observed project.
    pub paths: Arc<SteerPaths>,
    /// Iteration budget shown in the waiting placeholder.
    pub max_iterations: u32,
    /// Poll interval for the file watcher and the terminal renderer.
    pub refresh: Duration,
    /// Broadcast sender for file change events.
    pub event_tx: Arc<broadcast::Sender<ChangeEvent>>,
}

impl AppState {
    pub fn new(paths: SteerPaths, max_iterations: u32, refresh: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            paths: Arc::new(paths),
            max_iterations,
            refresh,
            event_tx: Arc::new(event_tx),
        }
    }

    pub fn iterations_dir(&self) -> PathBuf {
        self.paths.iterations_dir.clone()
    }

    /// Current snapshot, or the waiting placeholder when absent or malformed.
    pub fn run_state(&self) -> RunState {
        StateStore::new(&self.paths.state_path).load_or_waiting(self.max_iterations)
    }
}
