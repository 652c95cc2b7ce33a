// crates/server/src/main.rs
//! TomCat server binary.
//!
//! Resolves the data directory, builds the shared state and serves the API.
//! A background sweeper drops finished jobs once they leave the retention
//! window.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tomcat_core::DataLayout;
use tomcat_server::jobs::runner::DEFAULT_WORKERS;
use tomcat_server::{create_app, AppState};
use tracing_subscriber::EnvFilter;

/// Default port for the server.
const DEFAULT_PORT: u16 = 5000;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "warn,tomcat_server=info,tomcat_core=info";

/// How often finished jobs are swept.
const PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("TOMCAT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Worker pool size from environment or default. Zero is not a pool.
fn get_workers() -> usize {
    std::env::var("TOMCAT_WORKERS")
        .ok()
        .and_then(|w| w.parse().ok())
        .filter(|&w| w > 0)
        .unwrap_or(DEFAULT_WORKERS)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();

    let layout = DataLayout::from_env();
    let workers = get_workers();
    let state = AppState::new(layout, workers)
        .with_context(|| "Failed to prepare the data directory")?;

    tracing::info!(
        data_dir = %state.layout.data_dir().display(),
        workers,
        "Catalogue state ready"
    );

    let jobs = state.jobs.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PRUNE_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let pruned = jobs.prune_expired();
            if pruned > 0 {
                tracing::debug!(pruned, "Pruned finished jobs");
            }
        }
    });

    let app = create_app(state);

    let port = get_port();
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    eprintln!("\n  TomCat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("  \u{2192} http://localhost:{port}\n");

    axum::serve(listener, app).await?;

    Ok(())
}
