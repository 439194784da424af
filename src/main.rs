mod app;
mod config;
mod drain;
mod error;
mod oauth;
mod pipes;
mod routes;
mod session;
mod sync_key;

use clap::Parser;
use std::path::PathBuf;

/// Photo pipe relay — links users through the aggregation API, provisions
/// photo pipes for them and counts what the pipes deliver.
#[derive(Parser, Debug)]
#[command(name = "photo-pipe-relay", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Port to listen on (overrides config file)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut cfg = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // CLI --port overrides config
    if let Some(port) = cli.port {
        cfg.server.port = port;
    }

    if !cfg.aggregator.has_credentials() {
        tracing::warn!("aggregator client_id/client_secret not set; the landing page will report an error");
    }
    tracing::info!(
        api_base_url = %cfg.aggregator.api_base_url,
        pipes_base_url = %cfg.pipes.api_base_url,
        services = cfg.services.len(),
        "Configuration loaded successfully"
    );

    let state = match app::AppState::from_config(&cfg).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Startup error: {e}");
            std::process::exit(1);
        }
    };

    let app = routes::router(state);

    let bind_addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    tracing::info!("Listening on {bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {bind_addr}: {e}");
            std::process::exit(1);
        });

    axum::serve(listener, app).await.unwrap_or_else(|e| {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    });
}
