use anyhow::Context;
use axum::Router;
use clap::Parser;
use ev_progress_server::cli::Args;
use std::net::SocketAddr;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level)?;
    info!(
        storage = ?args.storage,
        streak_window_days = args.streak_window_days,
        certificate_threshold = args.default_certificate_threshold,
        "Starting EV progress server"
    );

    let router = ev_progress_server::init_router(&args)?;

    serve(router, args.server_address)
        .await
        .context("Server failed to run")?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log filter '{}'", log_level))?;
    fmt().with_env_filter(filter).init();
    Ok(())
}

async fn serve(router: Router, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Axum server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
