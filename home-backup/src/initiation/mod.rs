//! Hooks run once a restore has settled the state of the home directory.

pub mod restore_log;

use crate::utils::Result;
use std::path::Path;
use tracing::info;

pub use restore_log::{RestoreLog, RestoreLogStrategy};

pub trait InitiationStrategy: Send + Sync {
    /// Called when there was nothing to restore.
    fn initialize_new_environment(&self, root: &Path) -> Result<()>;

    /// Called after every container up to `last_backup_id` was restored.
    fn initialize_restored_environment(&self, root: &Path, last_backup_id: &str) -> Result<()>;
}

/// Does nothing beyond logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInitiation;

impl InitiationStrategy for NoopInitiation {
    fn initialize_new_environment(&self, root: &Path) -> Result<()> {
        info!("Starting with a new home directory at {}", root.display());
        Ok(())
    }

    fn initialize_restored_environment(&self, root: &Path, last_backup_id: &str) -> Result<()> {
        info!("Restored {} from {}", root.display(), last_backup_id);
        Ok(())
    }
}
