//! Retention of older containers after a successful backup.

use crate::storage::Storage;
use crate::utils::Result;
use tracing::{debug, info};

pub trait BackupHistory: Send + Sync {
    /// Apply the retention policy. `latest` is the container just stored.
    fn process_historic_backups(&self, storage: &dyn Storage, latest: &str) -> Result<()>;
}

/// Deletes every stored container except the latest one.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLatestBackupHistory;

impl BackupHistory for KeepLatestBackupHistory {
    fn process_historic_backups(&self, storage: &dyn Storage, latest: &str) -> Result<()> {
        let mut deleted = 0usize;
        for name in storage.list_files()? {
            if name != latest {
                debug!("Deleting old backup {}", name);
                storage.delete_file(&name)?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!("Deleted {} old backup(s), keeping {}", deleted, latest);
        }
        Ok(())
    }
}

/// Keeps every container. Used for incremental backups, which depend on the
/// containers before them.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepAllBackupHistory;

impl BackupHistory for KeepAllBackupHistory {
    fn process_historic_backups(&self, _storage: &dyn Storage, _latest: &str) -> Result<()> {
        Ok(())
    }
}
