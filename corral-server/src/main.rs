//! corral – entry point.
//!
//! Startup order:
//! 1. Parse the `-c/--config` flag and load the TOML configuration.
//! 2. Initialise structured tracing (JSON or pretty per config).
//! 3. Build the shared state (supervisor, selector, dump writer).
//! 4. Bind every configured listen endpoint; startup fails only when none
//!    can be bound.
//! 5. Serve until SIGINT/SIGTERM, then drain the in-flight request
//!    (30 s fallback) and stop the engine.

mod dump;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use corral_core::GatewayConfig;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::dump::DumpWriter;
use crate::state::AppState;

/// Grace window for the in-flight request once shutdown begins.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "corral")]
#[command(about = "OpenAI-compatible gateway over on-demand llama-server processes")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // ── 1. Configuration ───────────────────────────────────────────────────────
    let config = match GatewayConfig::load(&args.config) {
        Ok(config) => Arc::new(config),
        Err(error) => {
            eprintln!("configuration error: {error}");
            let mut source = std::error::Error::source(&error);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.parse().unwrap_or_default()),
        )
        .with_target(true);

    if config.server.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "corral starting");

    // ── 3. Shared state ────────────────────────────────────────────────────────
    let dumps = match &config.server.dumps_dir {
        Some(dir) => match DumpWriter::new(dir.clone(), config.server.purge_dumps_at_start) {
            Ok(writer) => {
                info!(dir = %dir.display(), "request dumps enabled");
                Some(writer)
            }
            Err(error) => {
                eprintln!("cannot prepare dumps dir {}: {error}", dir.display());
                std::process::exit(EXIT_CONFIG_ERROR);
            }
        },
        None => None,
    };

    let state = Arc::new(AppState::new(Arc::clone(&config), dumps));
    let model_names: Vec<&str> = config.models.iter().map(|m| m.name.as_str()).collect();
    info!(models = ?model_names, "configuration loaded");

    // ── 4. Listeners ───────────────────────────────────────────────────────────
    // Best-effort binding: individual failures are logged and skipped;
    // startup fails only when no endpoint could be bound at all.
    let mut listeners = Vec::new();
    for addr in config
        .server
        .listen_v4
        .iter()
        .chain(config.server.listen_v6.iter())
    {
        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(%addr, "listening");
                listeners.push(listener);
            }
            Err(error) => error!(%addr, %error, "failed to bind; skipping"),
        }
    }
    if listeners.is_empty() {
        error!("no configured listen endpoint could be bound");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    // ── 5. Serve until interrupted ─────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received; draining in-flight request");
        let _ = shutdown_tx.send(true);
    });

    let app = routes::build(Arc::clone(&state));
    let servers = listeners.into_iter().map(|listener| {
        let app = app.clone();
        let mut rx = shutdown_rx.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.wait_for(|stopping| *stopping).await;
                })
                .await
        }
    });
    let serve_all = futures::future::join_all(servers);

    let mut drain_rx = shutdown_rx.clone();
    let drain_deadline = async move {
        let _ = drain_rx.wait_for(|stopping| *stopping).await;
        tokio::time::sleep(SHUTDOWN_DRAIN_TIMEOUT).await;
    };

    tokio::select! {
        results = serve_all => {
            for result in results {
                if let Err(error) = result {
                    error!(%error, "server task failed");
                }
            }
        }
        _ = drain_deadline => {
            warn!(
                timeout_secs = SHUTDOWN_DRAIN_TIMEOUT.as_secs(),
                "in-flight request did not finish in time; shutting down anyway"
            );
        }
    }

    state.supervisor.shutdown().await;
    info!("corral stopped");

    if *shutdown_rx.borrow() {
        std::process::exit(EXIT_INTERRUPTED);
    }
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }
}
