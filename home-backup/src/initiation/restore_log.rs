use super::InitiationStrategy;
use crate::utils::Result;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

pub const RESTORE_LOG_FILE: &str = ".restore.log";
const SUCCESS_MESSAGE: &str = " successfully restored at time: ";

/// One-line log in the home directory naming the last restored container.
#[derive(Debug, Clone)]
pub struct RestoreLog {
    path: PathBuf,
}

impl RestoreLog {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(RESTORE_LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_backup_id(&self) -> Result<Option<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No restore log at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(content.lines().next().and_then(parse_last_backup_id))
    }

    pub fn write_last_backup_id(&self, backup_id: &str) -> Result<()> {
        let line = format!("{}{}{}\n", backup_id, SUCCESS_MESSAGE, Utc::now().to_rfc3339());
        fs::write(&self.path, line)?;
        debug!("Recorded restore of {}", backup_id);
        Ok(())
    }
}

fn parse_last_backup_id(line: &str) -> Option<String> {
    line.find(SUCCESS_MESSAGE)
        .map(|index| line[..index].to_string())
        .filter(|id| !id.is_empty())
}

/// Records each restored backup in the [`RestoreLog`] and raises
/// [`restart_required`](Self::restart_required) when the restored backup
/// differs from the logged one, i.e. the running process still has stale
/// state loaded.
#[derive(Debug, Default)]
pub struct RestoreLogStrategy {
    restart_required: AtomicBool,
}

impl RestoreLogStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restart_required(&self) -> bool {
        self.restart_required.load(Ordering::SeqCst)
    }
}

impl InitiationStrategy for RestoreLogStrategy {
    fn initialize_new_environment(&self, root: &Path) -> Result<()> {
        info!("Initialized new environment at {}", root.display());
        Ok(())
    }

    fn initialize_restored_environment(&self, root: &Path, last_backup_id: &str) -> Result<()> {
        let log = RestoreLog::new(root);
        let logged = log.last_backup_id()?;

        if logged.as_deref() == Some(last_backup_id) {
            info!("Home directory already up to date with {}", last_backup_id);
            return Ok(());
        }

        match logged {
            Some(logged) => debug!("Restored {} replaces previously restored {}", last_backup_id, logged),
            None => debug!("First restore, recording {}", last_backup_id),
        }

        log.write_last_backup_id(last_backup_id)?;
        self.restart_required.store(true, Ordering::SeqCst);
        info!("Restored data from {}, restart required", last_backup_id);
        Ok(())
    }
}
