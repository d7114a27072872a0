//! Server-Sent Events stream and polling file watcher.

use std::collections::HashSet;
use std::convert::Infallible;
use std::path::Path;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use steer_runner::io::iteration_log::list_iterations;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Debug, Serialize)]
struct SsePayload<'a> {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iter: Option<u32>,
}

impl<'a> From<&'a ChangeEvent> for SsePayload<'a> {
    fn from(event: &'a ChangeEvent) -> Self {
        match event {
            ChangeEvent::StateChanged => SsePayload {
                event_type: "state_changed",
                run_id: None,
                iter: None,
            },
            ChangeEvent::FeedbackChanged => SsePayload {
                event_type: "feedback_changed",
                run_id: None,
                iter: None,
            },
            ChangeEvent::IterationAdded { run_id, iter } => SsePayload {
                event_type: "iteration_added",
                run_id: Some(run_id.as_str()),
                iter: Some(*iter),
            },
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(change_event) => {
                    let payload = SsePayload::from(&change_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event("change").data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Start the file watcher in a background task.
pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %format!("{e:#}"), "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(state.refresh),
    )?;

    let workflow_dir = state.paths.workflow_dir.clone();
    let mut watching = false;
    let mut known_iterations: HashSet<(String, u32)> = list_iterations(&state.iterations_dir())
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(state.refresh);
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                // The runner may create `.spec-workflow/` after the monitor starts.
                if !watching && workflow_dir.is_dir() {
                    watcher.watch(&workflow_dir, RecursiveMode::Recursive)?;
                    info!(path = %workflow_dir.display(), "watching workflow directory");
                    watching = true;
                    let _ = state.event_tx.send(ChangeEvent::StateChanged);
                }
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&state, &pending_events, &mut known_iterations);
                pending_events.clear();
            }
        }
    }
}

fn process_events(
    state: &AppState,
    events: &[NotifyEvent],
    known_iterations: &mut HashSet<(String, u32)>,
) {
    let mut state_changed = false;
    let mut feedback_changed = false;
    let mut new_iterations: Vec<(String, u32)> = Vec::new();

    let state_path = &state.paths.state_path;
    let feedback_dir = &state.paths.feedback_dir;
    let iter_dir = &state.paths.iterations_dir;

    for event in events {
        let written = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
        let removed = matches!(event.kind, EventKind::Remove(_));
        if !written && !removed {
            continue;
        }

        for path in &event.paths {
            if path == state_path {
                state_changed |= written;
            } else if path.starts_with(feedback_dir) {
                // Archiving removes pending.md, which is a change too.
                feedback_changed = true;
            } else if written && path.starts_with(iter_dir) {
                let Some(key) = parse_iteration_path(iter_dir, path) else {
                    continue;
                };
                if known_iterations.insert(key.clone()) {
                    new_iterations.push(key);
                }
            }
        }
    }

    if state_changed {
        debug!("broadcasting state change");
        let _ = state.event_tx.send(ChangeEvent::StateChanged);
    }
    if feedback_changed {
        debug!("broadcasting feedback change");
        let _ = state.event_tx.send(ChangeEvent::FeedbackChanged);
    }

    new_iterations.sort();
    for (run_id, iter) in new_iterations {
        debug!(run_id = %run_id, iter, "broadcasting new iteration");
        let _ = state
            .event_tx
            .send(ChangeEvent::IterationAdded { run_id, iter });
    }
}

fn parse_iteration_path(iter_dir: &Path, path: &Path) -> Option<(String, u32)> {
    let rel = path.strip_prefix(iter_dir).ok()?;
    let mut components = rel.components();

    let run_id = components.next()?.as_os_str().to_str()?.to_string();
    let iter = components.next()?.as_os_str().to_str()?.parse::<u32>().ok()?;

    Some((run_id, iter))
}
