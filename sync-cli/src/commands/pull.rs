//! Network-first read of a collection.

use anyhow::Result;

use crate::app::App;

/// Run the pull command.
///
/// Prints one JSON record per line. Falls back to the local cache when
/// offline or when the remote fails.
pub async fn run(app: &App, collection: &str) -> Result<()> {
    let repo = app.repository(collection)?;
    let records = repo.list().await?;

    for record in &records {
        println!("{}", serde_json::to_string(&record.to_value())?);
    }
    tracing::info!("{} records in {}", records.len(), collection);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing;
    use crate::commands::write;

    #[tokio::test]
    async fn offline_pull_reads_cache() {
        let (_dir, app) = testing::app(true).await;
        write::run(&app, write::Kind::Create, "missions", r#"{"id":"m-1"}"#)
            .await
            .unwrap();

        assert!(run(&app, "missions").await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_remote_falls_back_to_cache() {
        let (_dir, app) = testing::app(false).await;
        write::run(&app, write::Kind::Create, "missions", r#"{"id":"m-1"}"#)
            .await
            .unwrap();

        assert!(run(&app, "missions").await.is_ok());
        let cached = app.repository("missions").unwrap().list().await.unwrap();
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn invalid_collection_is_rejected() {
        let (_dir, app) = testing::app(true).await;
        assert!(run(&app, "no such table").await.is_err());
    }
}
