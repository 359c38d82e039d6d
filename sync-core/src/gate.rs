//! Per-record ordering inside one drain.
//!
//! The drain is FIFO over the whole queue snapshot. Once an entry for a
//! record is sent back for retry, every later entry for the same record is
//! held until the next run, so an UPDATE can never overtake the CREATE it
//! depends on. Unrelated records keep flowing.
//!
//! An entry may carry several keys (an upsert is known by its id and by its
//! natural key). It is held when any of them is held.

use std::collections::HashSet;

use sync_types::RecordKey;

/// Tracks records whose earlier entry is waiting for a retry.
#[derive(Debug, Default)]
pub struct RecordGate {
    held: HashSet<RecordKey>,
}

impl RecordGate {
    /// Create an empty gate (one per run).
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an entry known by `keys` may be dispatched now.
    pub fn admits(&self, keys: &[RecordKey]) -> bool {
        !keys.iter().any(|key| self.held.contains(key))
    }

    /// Hold every later entry sharing one of `keys` until the next run.
    pub fn hold(&mut self, keys: impl IntoIterator<Item = RecordKey>) {
        self.held.extend(keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_types::{Collection, EntityId};

    fn key(collection: &str, id: &str) -> RecordKey {
        RecordKey::by_id(
            &Collection::new(collection).unwrap(),
            &EntityId::parse(id).unwrap(),
        )
    }

    fn natural(collection: &str, driver: &str) -> RecordKey {
        RecordKey::Natural {
            collection: Collection::new(collection).unwrap(),
            fields: vec![("driver_id".into(), format!("{:?}", driver))],
        }
    }

    #[test]
    fn empty_gate_admits_everything() {
        let gate = RecordGate::new();
        assert!(gate.admits(&[key("missions", "m-1")]));
        assert!(gate.admits(&[]));
    }

    #[test]
    fn held_record_is_blocked() {
        let mut gate = RecordGate::new();
        gate.hold([key("missions", "m-1")]);

        assert!(!gate.admits(&[key("missions", "m-1")]));
    }

    #[test]
    fn other_records_are_not_blocked() {
        let mut gate = RecordGate::new();
        gate.hold([key("missions", "m-1")]);

        assert!(gate.admits(&[key("missions", "m-2")]));
        // Same id in another collection is a different record
        assert!(gate.admits(&[key("invoices", "m-1")]));
    }

    #[test]
    fn any_shared_key_blocks() {
        let mut gate = RecordGate::new();
        gate.hold([key("trip_rates", "r-1"), natural("trip_rates", "d-1")]);

        assert!(!gate.admits(&[key("trip_rates", "r-2"), natural("trip_rates", "d-1")]));
        assert!(!gate.admits(&[key("trip_rates", "r-1")]));
        assert!(gate.admits(&[key("trip_rates", "r-2"), natural("trip_rates", "d-2")]));
    }

    #[test]
    fn holding_twice_is_idempotent() {
        let mut gate = RecordGate::new();
        gate.hold([key("missions", "m-1")]);
        gate.hold([key("missions", "m-1")]);
        assert!(!gate.admits(&[key("missions", "m-1")]));
        assert!(gate.admits(&[key("missions", "m-2")]));
    }
}
