//! Show queue counts and connectivity.

use anyhow::Result;

use crate::app::App;

/// Run the status command.
pub async fn run(app: &App) -> Result<()> {
    let status = app.engine().status().await?;

    println!("=== fleetsync status ===");
    println!();
    println!("Remote:");
    println!("  URL:    {}", app.config.remote.base_url);
    println!(
        "  Status: {}",
        if status.online { "ONLINE" } else { "OFFLINE" }
    );
    println!();
    println!("Queue:");
    println!("  Pending: {}", status.counts.pending);
    println!("  Syncing: {}", status.counts.syncing);
    println!("  Failed:  {}", status.counts.failed);

    if status.counts.syncing > 0 {
        println!();
        println!("SYNCING entries are in flight, or were left by an interrupted run and");
        println!("are retried on the next sync.");
    }
    if status.counts.failed > 0 {
        println!();
        println!("Inspect failures with 'fleetsync queue --failed', then 'fleetsync resubmit <seq>'");
        println!("or 'fleetsync purge --failed --yes'.");
    }

    Ok(())
}
