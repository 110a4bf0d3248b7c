use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod handlers;
mod metrics;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::config::{DEFAULT_CONFIG_FILE, FileConfig, ServerConfig};
use crate::metrics::ServerMetrics;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "watch-party")]
#[command(about = "Signaling relay for browser watch parties")]
struct Cli {
    /// Config file (missing file means defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Listen host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding index.html and assets (overrides config)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub router: Arc<signal_relay::Router>,
    pub server_config: Arc<ServerConfig>,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    pub fn new(server_config: ServerConfig) -> Self {
        let registry = Arc::new(signal_relay::Registry::new());
        Self {
            router: Arc::new(signal_relay::Router::new(registry)),
            server_config: Arc::new(server_config),
            metrics: Arc::new(ServerMetrics::new()),
        }
    }
}

pub(crate) fn build_app(state: AppState) -> Router {
    let assets = handlers::static_routes(&state.server_config.static_dir);

    Router::new()
        .route("/", get(handlers::index_handler))
        .route("/ws", get(handlers::websocket_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(assets)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let default_directive = if debug {
        "watch_party=debug,signal_relay=debug,tower_http=debug,info"
    } else {
        "watch_party=info,signal_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(env_filter)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config: FileConfig = config::load_config(&cli.config)
        .extract()
        .with_context(|| format!("Invalid configuration ({})", cli.config.display()))?;
    let mut server_config = ServerConfig::from_file(&file_config);
    if let Some(host) = cli.host {
        server_config.host = host;
    }
    if let Some(port) = cli.port {
        server_config.port = port;
    }
    if let Some(static_dir) = cli.static_dir {
        server_config.static_dir = static_dir;
    }

    init_logging(cli.debug, server_config.log_file.as_deref())?;

    info!("Starting watch party signaling relay");
    if !server_config.static_dir.is_dir() {
        warn!(
            "Static directory {} not found; only the relay endpoints will work",
            server_config.static_dir.display()
        );
    }

    let addr = server_config.bind_addr()?;
    let state = AppState::new(server_config);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Watch party listening on http://{}", actual_addr);
    info!("  GET    /             - Landing page");
    info!("  GET    /ws           - Signaling WebSocket");
    info!("  GET    /health       - Health check");
    info!("  GET    /metrics      - Server metrics");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, stopping");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")
}
