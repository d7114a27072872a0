//! External stop sentinel (`<root>/stop.txt`).

use std::fs;
use std::path::Path;

use tracing::{info, warn};

/// True if a stop was requested. The sentinel is deleted on detection.
pub fn consume_stop_request(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    info!(path = %path.display(), "stop file detected");
    if let Err(err) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %err, "could not remove stop file");
    }
    true
}
