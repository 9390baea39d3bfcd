//! airwave - live MP3 HTTP stream player
//!
//! Composing layer: parses arguments, loads configuration, wires the HTTP
//! transport and cpal sink into a [`StreamEngine`], logs the engine's event
//! stream, and runs until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use airwave::audio::CpalSink;
use airwave::{HttpTransport, PlayerEvent, StreamConfig, StreamEngine};

/// Command-line arguments for airwave
#[derive(Parser, Debug)]
#[command(name = "airwave")]
#[command(about = "Live MP3 HTTP stream player")]
#[command(version)]
struct Args {
    /// Stream URL (overrides the config file's url)
    #[arg(short, long, env = "AIRWAVE_URL")]
    url: Option<String>,

    /// Path to a TOML configuration file
    #[arg(short, long, env = "AIRWAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Initial output volume (0.0 - 1.0)
    #[arg(short, long, default_value = "1.0")]
    volume: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "airwave=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => StreamConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => StreamConfig::default(),
    };
    if let Some(url) = args.url {
        config.url = url;
    }
    if config.url.is_empty() {
        anyhow::bail!("No stream URL given (use --url or set url in the config file)");
    }

    info!("Starting airwave for {}", config.url);

    let transport = HttpTransport::new(&config.url, config.connection_timeout());
    let sink = CpalSink::new().context("Failed to open audio output device")?;
    info!(
        "Audio device: {} @ {} Hz",
        sink.device_name(),
        sink.sample_rate()
    );

    let mut engine = StreamEngine::new(config, Box::new(transport), Box::new(sink));

    // Log the event stream; buffer-scheduled events are too chatty for logs
    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PlayerEvent::StateChanged { state, .. }) => {
                    info!("Stream state: {}", state);
                }
                Ok(PlayerEvent::ReconnectScheduled {
                    attempt,
                    max_attempts,
                    delay_ms,
                    ..
                }) => {
                    info!(
                        "Reconnect attempt {}/{} scheduled in {} ms",
                        attempt, max_attempts, delay_ms
                    );
                }
                Ok(PlayerEvent::BufferScheduled { .. }) => {}
                Err(RecvError::Lagged(n)) => {
                    warn!("Event log fell behind by {} events", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    engine.start();
    engine.set_volume(args.volume);
    engine.play();

    shutdown_signal().await;

    engine.shutdown();
    // Give the engine task a moment to stop the sink and exit
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
