//! Put a FAILED entry back in line.

use anyhow::{Context, Result};
use sync_types::Sequence;

use crate::app::App;

/// Run the resubmit command.
pub async fn run(app: &App, sequence: u64) -> Result<()> {
    let entry = app
        .engine()
        .resubmit_failed(Sequence::new(sequence))
        .await
        .with_context(|| format!("No FAILED entry #{}", sequence))?;

    println!(
        "Resubmitted #{} {} {}/{}",
        entry.sequence,
        entry.operation(),
        entry.target,
        entry.record_id()
    );
    println!("It will be pushed by the next sync.");
    Ok(())
}
