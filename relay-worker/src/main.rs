//! Webhook Relay - signed webhook ingress and queue-to-target relay.
//!
//! `--mode ingress` serves the webhook endpoint and enqueues verified
//! payloads. `--mode relay` polls the queue and forwards each payload to the
//! configured build server.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use webhook_relay::config::{IngressConfig, QueueConfig, RelayConfig};
use webhook_relay::{queue, web, AppState, Config, Consumer, Mode, ModeConfig, Publisher};

#[derive(Debug, Parser)]
#[command(name = "webhook-relay", version, about)]
struct Args {
    /// Run mode
    #[arg(long, value_enum, env = "RELAY_MODE", default_value = "ingress")]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    let args = Args::parse();
    info!(mode = ?args.mode, "webhook_relay_starting");

    // Missing configuration is fatal
    let config = Config::from_env(args.mode).context("Invalid configuration")?;

    match config.mode {
        ModeConfig::Ingress(ingress) => run_ingress(&config.queue, ingress).await,
        ModeConfig::Relay(relay) => run_relay(&config.queue, relay).await,
    }
}

async fn run_ingress(queue_config: &QueueConfig, config: IngressConfig) -> Result<()> {
    info!(
        port = config.port,
        signature_header = %config.signature_header,
        excluded_header_prefix = %config.excluded_header_prefix,
        "config_loaded"
    );

    let queue = queue::connect(queue_config).await?;
    let publisher = Publisher::new(queue);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = web::router(AppState::new(config, publisher.clone()));

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    publisher.close().await;

    info!("web_server_shutdown_complete");
    Ok(())
}

async fn run_relay(queue_config: &QueueConfig, config: RelayConfig) -> Result<()> {
    info!(
        target_url = %config.target_url,
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        "config_loaded"
    );

    if !queue_config.backend.has_visibility_window()
        && !config.receive.visibility_timeout.is_zero()
    {
        warn!(
            visibility_timeout_seconds = config.receive.visibility_timeout.as_secs(),
            "queue_visibility_timeout_ignored"
        );
    }

    let queue = queue::connect(queue_config).await?;
    let consumer = Consumer::from_config(queue.clone(), &config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    consumer.run(shutdown).await;
    queue.close().await;

    info!("relay_shutdown_complete");
    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("shutting_down");
}
