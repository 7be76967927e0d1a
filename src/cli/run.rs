use crate::config::{load_config, ConfigError};
use crate::ship::core::Shipper;
use crate::ship::http::{HttpTransport, HttpTransportError};
use crate::ship::scheduler::Scheduler;
use crate::spool::files::FilesError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("spool error: {0}")]
    Spool(#[from] FilesError),

    #[error("transport error: {0}")]
    Transport(#[from] HttpTransportError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/barge/config.yml");
            eprintln!("  /etc/barge/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'barge config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_shipper(&config_path).await.map_err(|e| e.into())
}

async fn run_shipper(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    let shipper_id = hostname::get()
        .ok()
        .and_then(|h| h.to_str().map(|s| s.to_string()))
        .unwrap_or_else(|| "barge".to_string());
    info!(
        shipper_id = %shipper_id,
        stream = %config.endpoint.stream,
        base_path = %config.spool.base_path.display(),
        "Starting shipper"
    );

    let transport = HttpTransport::new(&config.endpoint, shipper_id)?;
    let shipper = Arc::new(Shipper::new(
        &config.spool.base_path,
        config.batch_posting_limit,
        transport,
    )?);
    info!(bookmark = %shipper.bookmark_path().display(), "Delivery progress is tracked here");

    let scheduler = Scheduler::start(shipper, config.tick_period);

    info!("Shipper started, press Ctrl+C to stop");
    signal::ctrl_c().await?;

    info!("Shutdown signal received, draining");
    scheduler.shutdown().await;
    info!("Shipper stopped");

    Ok(())
}
