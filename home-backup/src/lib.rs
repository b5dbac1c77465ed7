//! home-backup library
//!
//! Full and incremental backups of an application home directory into
//! archive containers kept in pluggable storage, and ordered restore of the
//! latest backup.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod history;
pub mod initiation;
pub mod scope;
pub mod storage;
pub mod trigger;
pub mod utils;
pub mod version;
pub mod volume;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{BackupError, Result};
