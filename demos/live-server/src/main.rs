//! Live relay server: serves the client page and relays `/live` websockets
//! to Gemini Live sessions.
//!
//! Run with: GOOGLE_API_KEY=... cargo run -p live-server
//!
//! Then open http://localhost:8080 in your browser.

mod config;

use std::sync::Arc;

use anyhow::Context as _;
use live_relay_core::LiveConnectConfig;
use live_relay_gemini::{ClientConfig, GeminiClient};
use live_relay_transport::{Relay, RelayOptions, create_relay_router};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = ServerConfig::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    let mut client_config = ClientConfig::new(config.api_key.clone());
    client_config.api_version.clone_from(&config.api_version);
    let factory = Arc::new(GeminiClient::new(client_config));

    let shutdown = CancellationToken::new();
    let relay = Relay::new(factory, config.model.clone(), LiveConnectConfig::default_demo())
        .with_options(RelayOptions {
            tool_timeout: config.tool_timeout,
            write_timeout: config.write_timeout,
            ..RelayOptions::default()
        })
        .with_shutdown(shutdown.clone());

    let app = create_relay_router(relay);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;
    tracing::info!("Running on http://{}", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on ctrl-c, after telling every running relay to stop.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
    shutdown.cancel();
}
