//! # sync-core
//!
//! Pure logic for fleetsync (no I/O, instant tests).
//!
//! This crate implements the state machines and decision rules of the sync
//! engine without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`EngineState`] decides whether a run may start and what follows it
//! - [`RetryPolicy`] turns a remote failure into a queue-entry disposition
//! - [`RecordGate`] keeps per-record ordering inside one drain
//! - [`ConnectivityTracker`] follows online/offline transitions
//!
//! The actual I/O (remote calls, SQLite) is performed by `sync-client` and
//! `sync-store`, which interpret the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod connectivity;
pub mod gate;
pub mod report;
pub mod state;

pub use classify::{classify, Disposition, FailureClass, RetryPolicy, DEFAULT_MAX_RETRIES};
pub use connectivity::{ConnectivityAction, ConnectivityEvent, ConnectivityTracker};
pub use gate::RecordGate;
pub use report::RunReport;
pub use state::{EngineAction, EngineEvent, EngineState, SkipReason};
