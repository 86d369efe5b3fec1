// Inventory sync daemon: loads configuration, opens the store and runs the
// scheduled feed sync until interrupted (or once with `--once`).

use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use inventory_sync_lib::application::{
    FeedLayout, RecordValidator, SyncOptions, SyncScheduler, SyncWorkflow,
};
use inventory_sync_lib::infrastructure::{
    AppConfig, DatabaseConnection, SheetsFeedSource, init_logging, log_system_info,
};

/// Selects `config/{env}` on top of `config/default`
const ENV_SELECTOR: &str = "INVENTORY_SYNC_ENV";

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            // Logging may not be up yet
            eprintln!("inventory-sync: {e:#}");
            error!("Fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<bool> {
    let env = std::env::var(ENV_SELECTOR).ok();
    let config = AppConfig::load(env.as_deref()).context("Failed to load configuration")?;
    let run_once = config.sync.run_once || std::env::args().any(|arg| arg == "--once");

    init_logging(&config.logging)?;
    log_system_info();

    let layout = FeedLayout::by_version(config.feed.layout_version)
        .ok_or_else(|| anyhow!("Unknown feed layout version {}", config.feed.layout_version))?;

    let database = DatabaseConnection::connect(&config.database).await?;
    database.migrate().await?;

    let feed = SheetsFeedSource::new(&config.feed)?;
    let workflow = SyncWorkflow::new(
        feed,
        database.product_store(),
        RecordValidator::new(layout),
        SyncOptions {
            batch_size: config.sync.batch_size,
        },
    );
    info!(batch_size = workflow.batch_size(), "Sync workflow ready");

    let scheduler =
        SyncScheduler::new(workflow, config.sync.interval(), config.sync.retry_policy());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal_token.cancel();
    });

    let succeeded = if run_once {
        scheduler.run_once(&shutdown).await.is_success()
    } else {
        scheduler.run_until_cancelled(shutdown).await;
        true
    };

    database.close().await;
    Ok(succeeded)
}
