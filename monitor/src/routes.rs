//! HTTP route handlers for the monitor API. All handlers are read-only.

use std::fs;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use steer_runner::io::iteration_log::{IterationPaths, list_iterations as scan_iterations};
use steer_runner::io::run_state::RunState;
use tracing::warn;

use crate::state::AppState;
use crate::summary::render_summary;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state))
        .route("/summary", get(get_summary))
        .route("/feedback", get(get_feedback))
        .route("/iterations", get(list_iterations))
        .route("/iterations/{run_id}/{iter}", get(get_iteration))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/state - snapshot, or the waiting placeholder.
async fn get_state(State(state): State<AppState>) -> Json<RunState> {
    Json(state.run_state())
}

/// GET /api/summary - plain-text dashboard.
async fn get_summary(State(state): State<AppState>) -> String {
    render_summary(&state.run_state(), Utc::now())
}

/// GET /api/feedback - pending feedback text, empty when none.
async fn get_feedback(State(state): State<AppState>) -> Result<String, StatusCode> {
    let path = &state.paths.pending_feedback_path;
    if !path.is_file() {
        return Ok(String::new());
    }
    fs::read_to_string(path).map_err(|err| {
        warn!(path = %path.display(), error = %err, "failed to read pending feedback");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

#[derive(Debug, Serialize)]
struct IterationsResponse {
    runs: Vec<RunEntry>,
}

#[derive(Debug, Serialize)]
struct RunEntry {
    run_id: String,
    iterations: Vec<u32>,
}

/// GET /api/iterations - list all runs and their iterations.
async fn list_iterations(
    State(state): State<AppState>,
) -> Result<Json<IterationsResponse>, StatusCode> {
    let found = scan_iterations(&state.iterations_dir()).map_err(|err| {
        warn!(error = %format!("{err:#}"), "failed to list iterations");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // `found` is sorted by run id, then iteration.
    let mut runs: Vec<RunEntry> = Vec::new();
    for (run_id, iter) in found {
        match runs.last_mut() {
            Some(last) if last.run_id == run_id => last.iterations.push(iter),
            _ => runs.push(RunEntry {
                run_id,
                iterations: vec![iter],
            }),
        }
    }
    Ok(Json(IterationsResponse { runs }))
}

#[derive(Debug, Serialize)]
struct IterationDetail {
    meta: Value,
    agent_log: String,
}

/// GET /api/iterations/{run_id}/{iter} - metadata plus the agent log.
async fn get_iteration(
    State(state): State<AppState>,
    Path((run_id, iter)): Path<(String, u32)>,
) -> Result<Json<IterationDetail>, StatusCode> {
    if run_id.contains(['/', '\\']) || run_id.starts_with('.') {
        return Err(StatusCode::BAD_REQUEST);
    }
    let paths = IterationPaths::new(&state.iterations_dir(), &run_id, iter);
    if !paths.dir.is_dir() {
        return Err(StatusCode::NOT_FOUND);
    }

    let meta = read_json_value(&paths.meta_path)?;
    let agent_log = if paths.agent_log_path.is_file() {
        fs::read_to_string(&paths.agent_log_path)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    } else {
        String::new()
    };
    Ok(Json(IterationDetail { meta, agent_log }))
}

fn read_json_value(path: &std::path::Path) -> Result<Value, StatusCode> {
    if !path.exists() {
        return Ok(Value::Null);
    }
    let contents = fs::read_to_string(path).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use steer_runner::io::feedback::{FeedbackPriority, FeedbackStore, FeedbackType};
    use steer_runner::io::init::SteerPaths;
    use steer_runner::io::iteration_log::{IterationMeta, write_meta};
    use steer_runner::io::run_state::{RunStatus, StateStore};
    use tower::ServiceExt;

    use super::*;

    fn app(paths: SteerPaths) -> Router {
        let state = AppState::new(paths, 50, Duration::from_secs(2));
        Router::new().nest("/api", api_router()).with_state(state)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn health_is_ok() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (status, body) = get(app(SteerPaths::new(temp.path())), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn missing_state_serves_waiting_placeholder() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (status, body) = get(app(SteerPaths::new(temp.path())), "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["status"], "waiting");
        assert_eq!(value["iteration"]["specified"], 50);
    }

    #[tokio::test]
    async fn malformed_state_serves_waiting_placeholder() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SteerPaths::new(temp.path());
        fs::create_dir_all(&paths.monitor_dir).expect("mkdir");
        fs::write(&paths.state_path, "{ not json").expect("write");

        let (status, body) = get(app(paths), "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["status"], "waiting");
    }

    #[tokio::test]
    async fn state_and_summary_reflect_saved_snapshot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SteerPaths::new(temp.path());
        let mut snapshot = RunState::waiting(20);
        snapshot.status = RunStatus::Running;
        snapshot.iteration.current = 4;
        StateStore::new(&paths.state_path)
            .save(&snapshot)
            .expect("save");

        let (_, body) = get(app(paths.clone()), "/api/state").await;
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["status"], "running");
        assert_eq!(value["iteration"]["current"], 4);

        let (status, body) = get(app(paths), "/api/summary").await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).expect("utf8");
        assert!(text.contains("[RUNNING]"));
        assert!(text.contains("4/20"));
    }

    #[tokio::test]
    async fn feedback_is_empty_until_posted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SteerPaths::new(temp.path());

        let (status, body) = get(app(paths.clone()), "/api/feedback").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        FeedbackStore::new(&paths)
            .post("Add dark mode", FeedbackPriority::High, FeedbackType::Feature)
            .expect("post");
        let (_, body) = get(app(paths), "/api/feedback").await;
        let text = String::from_utf8(body).expect("utf8");
        assert!(text.contains("Add dark mode"));
    }

    #[tokio::test]
    async fn lists_iterations_grouped_by_run() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = SteerPaths::new(temp.path());
        for (run_id, iter) in [("run-a", 2), ("run-a", 1), ("run-b", 1)] {
            let iter_paths = IterationPaths::new(&paths.iterations_dir, run_id, iter);
            write_meta(
                &iter_paths,
                &IterationMeta {
                    run_id: run_id.to_string(),
                    iteration: iter,
                    exit_code: 0,
                    commit_before: None,
                    commit_after: None,
                    new_commits: 0,
                    decision: "continue".to_string(),
                    duration_ms: 5,
                },
            )
            .expect("meta");
        }
        fs::write(
            IterationPaths::new(&paths.iterations_dir, "run-a", 2).agent_log_path,
            "hello from agent\n",
        )
        .expect("log");

        let (status, body) = get(app(paths.clone()), "/api/iterations").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["runs"][0]["run_id"], "run-a");
        assert_eq!(value["runs"][0]["iterations"], serde_json::json!([1, 2]));
        assert_eq!(value["runs"][1]["run_id"], "run-b");

        let (status, body) = get(app(paths.clone()), "/api/iterations/run-a/2").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["meta"]["decision"], "continue");
        assert_eq!(value["agent_log"], "hello from agent\n");

        let (status, _) = get(app(paths), "/api/iterations/run-a/9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn no_iterations_directory_lists_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (status, body) = get(app(SteerPaths::new(temp.path())), "/api/iterations").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(value["runs"], serde_json::json!([]));
    }
}
