//! # sync-client
//!
//! Offline-first sync engine for fleetsync.
//!
//! This is the main library that applications use to read and write
//! entities while connectivity comes and goes.
//!
//! ## Features
//!
//! - **Optimistic writes**: local store and sync queue updated in one transaction
//! - **Sequential drain**: per-record order kept, bounded retries, permanent
//!   failures classified and parked as FAILED
//! - **Network-first reads**: remote snapshot refreshes the cache, cache on failure
//! - **Remote abstraction**: pluggable remote store (HTTP, mock)
//! - **Pure state machine**: uses sync-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use sync_client::{
//!     spawn_sync_loop, ConnectivitySignal, EngineConfig, EntityRepository, HttpRemote,
//!     RecordMapper, SyncEngine,
//! };
//! use sync_store::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::new(path).await?);
//! let remote = Arc::new(HttpRemote::new(url, None, timeout)?);
//! let connectivity = ConnectivitySignal::new(true);
//!
//! let engine = Arc::new(SyncEngine::new(
//!     store.clone(),
//!     remote.clone(),
//!     connectivity.clone(),
//!     EngineConfig::default(),
//! ));
//! let (trigger, _loop) = spawn_sync_loop(engine);
//!
//! let missions = EntityRepository::new(collection, RecordMapper, store, remote, connectivity)
//!     .with_trigger(trigger);
//! missions.create(&record).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod remote;
pub mod repository;
pub mod scheduler;

pub use config::{CollectionConfig, Config, ConfigError, EngineSection, RemoteConfig, StoreConfig};
pub use connectivity::ConnectivitySignal;
pub use engine::{Confirm, EngineConfig, RunOutcome, SyncEngine, SyncStatus};
pub use error::ClientError;
pub use mapper::{EntityMapper, RecordMapper, SerdeMapper};
pub use remote::{HttpRemote, MockRemote, RemoteCall, RemoteMethod, RemoteStore};
pub use repository::{EntityRepository, DEFAULT_READ_TIMEOUT};
pub use scheduler::{spawn_sync_loop, RunTrigger, SyncTrigger};
