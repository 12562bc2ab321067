//! Ledger server binary

use ledger_core::{Config, Ledger};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting transfer ledger");

    // Load configuration: file path from argv, otherwise LEDGER_* variables
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => Config::from_env()?,
    };

    let ledger = Ledger::open(&config).await?;
    tracing::info!(backend = %ledger.backend(), "Ledger opened successfully");

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger");
    tracing::info!(metrics = %ledger.metrics().render()?, "Final metrics");
    ledger.close().await?;
    Ok(())
}
