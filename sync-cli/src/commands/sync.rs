//! Drain the queue once against the remote.

use anyhow::Result;
use sync_client::RunOutcome;

use crate::app::App;

/// Run the sync command.
pub async fn run(app: &App) -> Result<()> {
    let engine = app.engine();
    let before = engine.status().await?.counts;
    if before.outstanding() == 0 {
        println!("Nothing to sync.");
        return Ok(());
    }

    println!(
        "Syncing {} queued entries to {}...",
        before.outstanding(),
        app.config.remote.base_url
    );

    match engine.run_once().await? {
        RunOutcome::Skipped(reason) => {
            println!("Sync skipped: {}", reason);
        }
        RunOutcome::Completed {
            report,
            retry_after,
        } => {
            println!();
            println!("  Attempted: {}", report.attempted);
            println!("  Succeeded: {}", report.succeeded);
            println!("  Retried:   {}", report.retried);
            println!("  Failed:    {}", report.failed);
            println!("  Deferred:  {}", report.deferred);
            if report.interrupted {
                println!();
                println!("Connectivity was lost or another process took over; the rest stays queued.");
            }
            if let Some(delay) = retry_after {
                println!();
                println!(
                    "Some entries will be retried; run 'fleetsync sync' again in {}s or use 'fleetsync watch'.",
                    delay.as_secs().max(1)
                );
            }
            if report.failed > 0 {
                println!("Inspect failures with 'fleetsync queue --failed'.");
            }
        }
    }

    Ok(())
}
