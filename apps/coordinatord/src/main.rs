//! coordinatord - standalone coordinator for a media-transcode daemon fleet.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use coordinator_core::{bootstrap_services, Config};
use tokio::signal;
use tracing_subscriber::EnvFilter;

/// coordinatord - registry, routing and worker protocol for a transcode daemon fleet.
#[derive(Parser, Debug)]
#[command(name = "coordinatord")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "COORDINATORD_LOG_LEVEL")]
    log_level: String,

    /// Listen address (overrides config file), e.g. 0.0.0.0:7700.
    #[arg(short = 'l', long, env = "COORDINATORD_LISTEN_ADDRESS")]
    listen_address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "coordinatord starting");

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    if let Some(listen_address) = args.listen_address {
        config.listen_address = listen_address;
    }
    config.validate().context("invalid configuration")?;

    let services = bootstrap_services(&config, env!("CARGO_PKG_VERSION"))
        .context("failed to bootstrap services")?;

    tracing::info!("services bootstrapped");

    let admin_state = coordinator_core::admin::AdminState {
        facade: services.facade.clone(),
        rpc: services.rpc_state.clone(),
    };
    let router = coordinator_core::admin::router(admin_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_address))?;
    tracing::info!(address = %config.listen_address, "listening");

    let accept_cancellation = services.accept_cancellation();
    let server_handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            accept_cancellation.cancelled().await;
        });
        if let Err(err) = serve.await {
            tracing::error!(%err, "server error");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received");

    services.shutdown().await;
    let _ = server_handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
