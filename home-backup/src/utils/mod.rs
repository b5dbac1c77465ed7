//! Utility modules shared by backup and restore.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
