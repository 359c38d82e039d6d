//! CLI command implementations.

pub mod init;
pub mod pull;
pub mod purge;
pub mod queue;
pub mod resubmit;
pub mod status;
pub mod sync;
pub mod watch;
pub mod write;
