//! Read-only monitor for a warden project.
//!
//! Serves the computed lockout status, the raw store, and the enforcer
//! rules over HTTP, and streams change events (file watcher + periodic
//! status payload) over SSE for badge rendering. The server never
//! writes to the store; all mutation goes through the `warden` CLI.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use axum::Router;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "warden-ui")]
#[command(about = "Read-only web UI for monitoring warden lockout state")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Project directory (contains .warden/)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Directory containing UI static files (defaults to ui/dist under
    /// the project directory)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

/// Assembles the full router: API under /api, the SSE stream, CORS for
/// local development, and the static UI fallback when it exists.
fn build_router(state: AppState, ui_dir: &Path) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state);

    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app
            .fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }
    app
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warden_ui=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let project_dir = args.project_dir.canonicalize().unwrap_or(args.project_dir);
    let state = AppState::new(project_dir.clone());
    if !state.warden_dir().is_dir() {
        // Still serves: the API reports idle and the watcher stays quiet
        // until `warden init` runs.
        warn!(path = %state.warden_dir().display(), "project is not initialized");
    }
    info!(project_dir = %project_dir.display(), "starting warden-ui");

    sse::start_file_watcher(state.clone());
    sse::start_status_broadcast(state.clone());

    let ui_dir = args.ui_dir.unwrap_or_else(|| project_dir.join("ui").join("dist"));
    let app = build_router(state, &ui_dir);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let args = Args::parse_from(["warden-ui"]);
        assert_eq!(args.bind, "127.0.0.1");
        assert_eq!(args.port, 3001);
        assert_eq!(args.project_dir, PathBuf::from("."));
        assert!(args.ui_dir.is_none());
    }

    #[test]
    fn parse_custom_bind_and_project() {
        let args = Args::parse_from([
            "warden-ui",
            "--bind",
            "0.0.0.0",
            "--port",
            "8080",
            "--project-dir",
            "/srv/focus",
        ]);
        assert_eq!(args.bind, "0.0.0.0");
        assert_eq!(args.port, 8080);
        assert_eq!(args.project_dir, PathBuf::from("/srv/focus"));
    }
}
