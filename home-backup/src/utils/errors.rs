//! Custom error types for backup and restore.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid exclusion pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Volume already exists: {}", .0.display())]
    VolumeExists(PathBuf),

    #[error("Volume closed: {}", .0.display())]
    VolumeClosed(PathBuf),

    #[error("Restore chain interrupted before extracting {0}")]
    ChainInterrupted(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("A backup or restore is already in progress")]
    Busy,
}

impl BackupError {
    /// Whether this error is a consequence of an earlier failure in the
    /// restore chain rather than a failure of its own.
    pub fn is_chain_interruption(&self) -> bool {
        matches!(self, BackupError::ChainInterrupted(_))
    }
}

impl From<tokio::task::JoinError> for BackupError {
    fn from(err: tokio::task::JoinError) -> Self {
        BackupError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
