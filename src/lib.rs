//! Capture Supervisor - keeps an external video capture process alive.
//!
//! This is the main library crate. It provides the capture subprocess
//! supervisor, its configuration, and the application entry point used by
//! the binary.

pub mod capture;
pub mod config;
pub mod utils;

use capture::CaptureSource;
use config::AppConfig;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::AppResult;

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "capture_supervisor=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run a capture session until Ctrl-C.
///
/// `config_path` overrides the default configuration file.
pub async fn run(config_path: Option<PathBuf>) -> AppResult<()> {
    tracing::info!("Starting Capture Supervisor v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(config_path.as_deref())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received interrupt, shutting down"),
            Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
        }
        on_signal.cancel();
    });

    let factory = capture::platform_factory(&config.capture.device_id);
    let source = factory(config.capture.output_path.clone(), config.camera.clone())?;

    source.start(&cancel).await?;
    tracing::info!(
        "{} recording to {:?}",
        source.name(),
        source.output_path()
    );

    cancel.cancelled().await;

    let started = source.config().start_time;
    let result = stop_with_timeout(
        source.as_ref(),
        Duration::from_secs(config.capture.shutdown_timeout_secs),
    )
    .await;

    if let Some(started) = started {
        let elapsed = chrono::Utc::now() - started;
        tracing::info!("Recording completed after {}s", elapsed.num_seconds());
    }
    result
}

/// Stop `source`, killing it if the stop takes longer than `timeout`
async fn stop_with_timeout(source: &dyn CaptureSource, timeout: Duration) -> AppResult<()> {
    let deadline = CancellationToken::new();
    let trigger = deadline.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        trigger.cancel();
    });

    let result = source.stop(&deadline).await;
    timer.abort();

    result.map_err(Into::into)
}
