//! # sync-types
//!
//! Data model types for the fleetsync offline-first sync engine.
//!
//! This crate provides the foundational types used across all fleetsync crates:
//! - [`EntityId`], [`Collection`], [`Sequence`], [`EngineId`] - Identity and ordering types
//! - [`EntityRecord`], [`RecordFilter`] - Cached entity snapshots and local queries
//! - [`QueueEntry`], [`Mutation`], [`Operation`], [`QueueStatus`] - Pending work
//! - [`RemoteError`], [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ids;
mod queue;
mod record;

pub use error::{codes, RemoteError, TypesError};
pub use ids::{Collection, EngineId, EntityId, Sequence};
pub use queue::{Mutation, Operation, QueueCounts, QueueEntry, QueueStatus, RecordKey};
pub use record::{EntityRecord, RecordFilter, ID_FIELD, OWNER_FIELD};
