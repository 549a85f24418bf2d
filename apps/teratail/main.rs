use anyhow::{Context, Result, anyhow};
use dotenv::dotenv;
use std::sync::Arc;
use teratail::{
    config,
    notifier::build_notifier,
    poller::{PollSettings, Poller},
    scheduler::run_periodic,
    store::{WatermarkStore, open_store},
    teratail_api::TeratailApi,
};
use tokio::sync::watch;
use tracing::{error, info};
use utils::tracing::run_with_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    run_with_tracing(run).await
}

async fn run() -> Result<()> {
    info!("Application starting up");

    let config = config::load();

    let api = TeratailApi::new_with_base_url(config.api_base_url.clone(), config.request_timeout())
        .context("Failed to build teratail API client")?;
    let notifier = build_notifier(
        config.slack_webhook_url.as_deref(),
        config.request_timeout(),
    )
    .context("Failed to build notifier")?;
    let store = open_store(&config.store_url).context("Failed to open watermark store")?;

    let poller = Arc::new(Poller::new(
        Arc::new(api),
        notifier,
        WatermarkStore::new(store),
        PollSettings::from(&config),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut poller_handle = tokio::spawn(run_periodic(
        poller,
        config.poll_interval(),
        shutdown_rx,
    ));

    tokio::select! {
        result = &mut poller_handle => {
            return Err(anyhow!("Poller task completed unexpectedly: {result:?}"));
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully");
        }
    }

    // let an in-flight cycle finish before exiting
    let _ = shutdown_tx.send(true);
    match poller_handle.await {
        Ok(cycles) => info!(cycles, "Application shutting down"),
        Err(e) => error!(error = ?e, "Poller task failed during shutdown"),
    }

    Ok(())
}
