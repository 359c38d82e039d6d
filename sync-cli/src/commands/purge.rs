//! Delete FAILED entries or the whole queue.

use anyhow::Result;
use sync_client::Confirm;

use crate::app::App;

/// Run the purge command.
pub async fn run(app: &App, all: bool, yes: bool) -> Result<()> {
    let engine = app.engine();
    let confirm = Confirm::from(yes);

    if !yes {
        let counts = engine.status().await?.counts;
        let affected = if all { counts.total() } else { counts.failed };
        println!(
            "This would permanently delete {} entries. Re-run with --yes to confirm.",
            affected
        );
    }

    let removed = if all {
        engine.purge_all(confirm).await?
    } else {
        engine.purge_failed(confirm).await?
    };
    println!("Removed {} entries.", removed);
    Ok(())
}
