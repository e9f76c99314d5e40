/// HTTP dashboard server
/// Serves the live usage page plus a small JSON/WebSocket API over the
/// shared profiler history

pub mod handlers;
pub mod routes;
pub mod static_files;
pub mod websocket;

pub use routes::create_router;

use anyhow::Context;
use colored::Colorize;
use std::future::Future;
use std::time::Duration;
use tracing::info;

use crate::core::SystemProfiler;
use crate::utils::format_interval;

/// State shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub profiler: SystemProfiler,
    /// Human-readable board address, e.g. `ssh:root@192.168.1.20`
    pub board: String,
    /// Default sliding window for the page
    pub window: Duration,
}

/// Dashboard URL for a bind address
pub fn dashboard_url(host: &str, port: u16) -> String {
    format!("http://{}:{}/", host, port)
}

pub async fn run<F>(
    state: AppState,
    host: &str,
    port: u16,
    enable_cors: bool,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let interval = state.profiler.config().interval;
    let window = state.window;
    let board = state.board.clone();
    let app = create_router(state, enable_cors);

    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind dashboard to {}:{}", host, port))?;
    info!(addr = ?listener.local_addr().ok(), "Dashboard listening");

    println!("{}", "Astra SL Resource Monitor".bold());
    println!("   Board:   {}", board);
    println!(
        "   Polling: every {}, {} window",
        format_interval(interval),
        format_interval(window)
    );
    println!("   Web UI:  {}", dashboard_url(host, port).green());
    println!();
    println!("Press Ctrl+C to exit");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Dashboard server failed")?;

    Ok(())
}
