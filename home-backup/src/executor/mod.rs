//! Backup and restore procedures.
//!
//! A backup is a synchronous walk into a single container. A restore replays
//! every container of the latest manifest and runs on the tokio runtime so
//! container fetches can overlap.

pub mod backup;
pub mod restore;

pub use backup::{container_name, container_time, BackupProcedure};
pub use restore::{RestoreProcedure, DEFAULT_MAX_CONCURRENT_FETCHES};
