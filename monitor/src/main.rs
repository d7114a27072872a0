//! Steer monitor - read-only dashboard for a running `steer` loop.
//!
//! Serves the run state over HTTP/SSE, or renders it in the terminal with
//! `--terminal`. Never writes to `.spec-workflow/`.

mod routes;
mod sse;
mod state;
mod summary;

use std::io::Write as _;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use chrono::Utc;
use clap::Parser;
use steer_runner::io::config::{ConfigOverrides, resolve_config, resolve_project_root};
use steer_runner::io::init::SteerPaths;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "steer-monitor")]
#[command(about = "Read-only dashboard for the steer development loop")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project directory (contains .spec-workflow/); defaults to STEER_PROJECT_ROOT or "."
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Seconds between polls of the state directory
    #[arg(long)]
    refresh_secs: Option<f64>,

    /// Render the dashboard in the terminal instead of serving HTTP
    #[arg(long)]
    terminal: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("steer_monitor=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let env_lookup = |key: &str| std::env::var(key).ok();

    let root = resolve_project_root(args.project_dir, env_lookup)?;
    let root = root.canonicalize().unwrap_or(root);
    let paths = SteerPaths::new(&root);
    let config = resolve_config(
        &paths,
        &ConfigOverrides {
            monitor_refresh_secs: args.refresh_secs,
            ..ConfigOverrides::default()
        },
        env_lookup,
    )?;
    info!(project_dir = %root.display(), "starting steer-monitor");

    let state = AppState::new(paths, config.max_iterations, config.monitor_refresh());

    if args.terminal {
        run_terminal(&state).await
    } else {
        serve(state, &args.bind, args.port).await
    }
}

async fn serve(state: AppState, bind: &str, port: u16) -> anyhow::Result<()> {
    sse::start_file_watcher(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {bind}:{port}"))?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("monitor stopped");
    Ok(())
}

async fn run_terminal(state: &AppState) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(state.refresh);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let text = summary::render_summary(&state.run_state(), Utc::now());
                let mut stdout = std::io::stdout().lock();
                // Clear screen, cursor home.
                write!(stdout, "\x1b[2J\x1b[H{text}")?;
                stdout.flush()?;
            }
            () = &mut shutdown => {
                println!();
                println!("Monitor stopped.");
                return Ok(());
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let args = Args::parse_from(["steer-monitor"]);
        assert_eq!(args.bind, "127.0.0.1");
        assert_eq!(args.port, 3001);
        assert!(args.project_dir.is_none());
        assert!(!args.terminal);
    }

    #[test]
    fn parse_terminal_mode() {
        let args = Args::parse_from([
            "steer-monitor",
            "--terminal",
            "--refresh-secs",
            "0.5",
            "--project-dir",
            "/tmp/project",
        ]);
        assert!(args.terminal);
        assert_eq!(args.refresh_secs, Some(0.5));
        assert_eq!(args.project_dir, Some(PathBuf::from("/tmp/project")));
    }
}
