//! List queue entries.

use anyhow::Result;
use sync_types::{QueueEntry, QueueStatus};

use crate::app::App;

/// Run the queue command.
pub async fn run(app: &App, failed_only: bool) -> Result<()> {
    let filter = failed_only.then_some(QueueStatus::Failed);
    let entries = app.engine().entries(filter).await?;

    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!(
        "{:>6}  {:<8}  {:<6}  {:>7}  RECORD",
        "SEQ", "STATUS", "OP", "RETRIES"
    );
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    println!();
    println!("{} entries", entries.len());

    Ok(())
}

/// One line per entry, with the diagnostic indented below FAILED entries.
fn format_entry(entry: &QueueEntry) -> String {
    let mut line = format!(
        "{:>6}  {:<8}  {:<6}  {:>7}  {}/{}",
        entry.sequence.value(),
        entry.status.as_str(),
        entry.operation().as_str(),
        entry.retry_count,
        entry.target,
        entry.record_id()
    );
    if let Some(error) = &entry.last_error {
        line.push_str(&format!("\n        error: {}", error));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing;
    use serde_json::json;
    use sync_store::SyncQueue;
    use sync_types::{Collection, EntityRecord, Mutation};

    #[tokio::test]
    async fn lists_entries() {
        let (_dir, app) = testing::app(true).await;
        assert!(run(&app, false).await.is_ok());

        let record = EntityRecord::from_value(json!({"id": "m-1"})).unwrap();
        app.store
            .enqueue(&Collection::new("missions").unwrap(), &Mutation::Create(record))
            .await
            .unwrap();
        assert!(run(&app, false).await.is_ok());
        assert!(run(&app, true).await.is_ok());
    }

    #[tokio::test]
    async fn failed_entry_shows_its_error() {
        let (_dir, app) = testing::app(true).await;
        let record = EntityRecord::from_value(json!({"id": "m-1"})).unwrap();
        let entry = app
            .store
            .enqueue(&Collection::new("missions").unwrap(), &Mutation::Create(record))
            .await
            .unwrap();
        app.store
            .mark_failed(entry.sequence, "permanent failure (malformed identifier)")
            .await
            .unwrap();

        let failed = app.engine().entries(Some(QueueStatus::Failed)).await.unwrap();
        let line = format_entry(&failed[0]);
        assert!(line.contains("FAILED"));
        assert!(line.contains("missions/m-1"));
        assert!(line.contains("malformed identifier"));
    }
}
