//! Optimistic local writes.

use anyhow::{Context, Result};
use serde_json::Value;
use sync_types::{EntityId, EntityRecord, QueueEntry, ID_FIELD};

use crate::app::App;

/// Which write to perform with a JSON record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Create,
    Update,
    Upsert,
}

/// Run a create, update or upsert.
pub async fn run(app: &App, kind: Kind, collection: &str, json: &str) -> Result<()> {
    let repo = app.repository(collection)?;
    let record = parse_record(kind, json)?;

    let entry = match kind {
        Kind::Create => repo.create(&record).await?,
        Kind::Update => repo.update(&record).await?,
        Kind::Upsert => repo.upsert(&record).await?,
    };
    report(app, &entry);
    Ok(())
}

/// Run a delete by id.
pub async fn delete(app: &App, collection: &str, id: &str) -> Result<()> {
    let repo = app.repository(collection)?;
    let id = EntityId::parse(id)?;
    let entry = repo.delete(&id).await?;
    report(app, &entry);
    Ok(())
}

/// Parse the JSON argument. Creates without an id get a fresh UUID.
fn parse_record(kind: Kind, json: &str) -> Result<EntityRecord> {
    let mut value: Value = serde_json::from_str(json).context("Record is not valid JSON")?;
    if kind == Kind::Create {
        if let Value::Object(object) = &mut value {
            if !object.contains_key(ID_FIELD) {
                object.insert(
                    ID_FIELD.to_string(),
                    Value::String(EntityId::generate().to_string()),
                );
            }
        }
    }
    Ok(EntityRecord::from_value(value)?)
}

fn report(app: &App, entry: &QueueEntry) {
    println!(
        "Queued #{} {} {}/{}",
        entry.sequence,
        entry.operation(),
        entry.target,
        entry.record_id()
    );
    if app.connectivity.is_online() {
        println!("Run 'fleetsync sync' to push it.");
    } else {
        println!("Offline: it will be pushed by the next sync.");
    }
}
