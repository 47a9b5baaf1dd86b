mod allowlist;
mod bloom;
mod config;
mod engine;
mod health;
mod http;
mod metrics;
mod ratelimit;
mod token;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::allowlist::PathAllowlist;
use crate::config::Config;
use crate::engine::DecisionEngine;
use crate::metrics::MetricsRegistry;
use crate::token::Es256Verifier;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "tokengate", about = "Token-verifying API gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "/etc/tokengate/config.yaml")]
    config: String,
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Global state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<DecisionEngine>,
    pub allowlist: Arc<PathAllowlist>,
    pub http_client: reqwest::Client,
    pub metrics: MetricsRegistry,
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state.clone()));

    let listen_addr: std::net::SocketAddr = state
        .config
        .proxy
        .listen
        .parse()
        .context("invalid listen address")?;

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(%listen_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(&cli.config)?;
    let config = Arc::new(config);

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(config_path = %cli.config, "starting tokengate");

    // ---- Metrics ----
    let metrics = MetricsRegistry::new();

    // ---- Verifier ----
    let pem = config.auth.resolve_public_key()?;
    let verifier = Es256Verifier::new(&pem).context("failed to load ES256 public key")?;

    // ---- Decision engine ----
    let engine = Arc::new(DecisionEngine::new(
        config.cache.bloom_config(),
        Arc::new(verifier),
        Arc::clone(&metrics.metrics),
    ));
    let rotation = engine.start_rotation();
    tracing::info!(
        generations = config.cache.generations,
        rotation_interval_secs = config.cache.rotation_interval_secs,
        "membership caches rotating"
    );

    // ---- Allowlist ----
    let allowlist = PathAllowlist::new(&config.allowlist).context("invalid allowlist pattern")?;
    tracing::info!(patterns = config.allowlist.len(), "allowlist compiled");

    // ---- HTTP client ----
    let http_client = reqwest::Client::builder()
        .user_agent("tokengate/0.1")
        .build()
        .context("failed to build reqwest client")?;

    // ---- App state ----
    let state = AppState {
        config: Arc::clone(&config),
        engine,
        allowlist: Arc::new(allowlist),
        http_client,
        metrics,
    };

    // ---- Serve until shutdown ----
    run_http_server(state).await?;

    rotation.stop();
    tracing::info!("tokengate shut down cleanly");
    Ok(())
}
