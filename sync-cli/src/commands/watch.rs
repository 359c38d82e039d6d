//! Run the sync loop until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use sync_client::{spawn_sync_loop, RunTrigger};

use crate::app::App;

/// Run the watch command.
pub async fn run(app: &App) -> Result<()> {
    let engine = Arc::new(app.engine());
    let (trigger, handle) = spawn_sync_loop(engine);

    println!("Watching queue (remote: {})", app.config.remote.base_url);
    match app.config.engine_config().periodic_interval {
        Some(interval) => println!("  Periodic sync every {}s", interval.as_secs()),
        None => println!("  Periodic sync disabled"),
    }
    println!("Press Ctrl-C to stop.");

    trigger.request(RunTrigger::Manual);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    drop(trigger);
    handle.await.context("Sync loop panicked")?;
    println!("Stopped.");
    Ok(())
}
