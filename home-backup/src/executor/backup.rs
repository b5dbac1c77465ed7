//! One backup run: walk the scope into a fresh container, store it, record
//! it and apply the retention policy.

use crate::history::BackupHistory;
use crate::scope::Scope;
use crate::storage::Storage;
use crate::utils::Result;
use crate::version;
use crate::volume::Volume;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

const TMP_DIR_PREFIX: &str = "backup-";

/// Container name for a backup taken at `time`:
/// `backup-YYYYMMDDHHMMSS[suffix].ext`.
pub fn container_name(time: DateTime<Utc>, suffix: Option<&str>, extension: &str) -> String {
    format!(
        "backup-{}{}.{}",
        time.format("%Y%m%d%H%M%S"),
        suffix.unwrap_or(""),
        extension
    )
}

/// Time encoded in a container name by [`container_name`], to the second.
pub fn container_time(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix("backup-")?.get(..14)?;
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .ok()
        .map(|time| time.and_utc())
}

pub(crate) fn scratch_temp_dir(scratch_dir: Option<&Path>, prefix: &str) -> std::io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match scratch_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            builder.tempdir_in(dir)
        }
        None => builder.tempdir(),
    }
}

pub struct BackupProcedure {
    volume: Arc<dyn Volume>,
    scope: Arc<dyn Scope>,
    storage: Arc<dyn Storage>,
    history: Arc<dyn BackupHistory>,
    root: PathBuf,
    scratch_dir: Option<PathBuf>,
    suffix: Option<String>,
}

impl BackupProcedure {
    pub fn new(
        volume: Arc<dyn Volume>,
        scope: Arc<dyn Scope>,
        storage: Arc<dyn Storage>,
        history: Arc<dyn BackupHistory>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            volume,
            scope,
            storage,
            history,
            root: root.into(),
            scratch_dir: None,
            suffix: None,
        }
    }

    /// Build containers below `dir` instead of the system temp directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Append `suffix` to container names, before the extension.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Run a backup stamped with the current time. Returns that time.
    pub fn perform_backup(&self) -> Result<DateTime<Utc>> {
        self.perform_backup_at(Utc::now())
    }

    pub fn perform_backup_at(&self, backup_time: DateTime<Utc>) -> Result<DateTime<Utc>> {
        info!("Starting backup of {}", self.root.display());

        let temp_dir = scratch_temp_dir(self.scratch_dir.as_deref(), TMP_DIR_PREFIX)?;
        let volume_name = container_name(
            backup_time,
            self.suffix.as_deref(),
            self.volume.file_extension(),
        );
        let volume_path = temp_dir.path().join(&volume_name);
        debug!("Building {} in {}", volume_name, temp_dir.path().display());

        let result = self.create_and_store(&volume_path, &volume_name);

        let temp_path = temp_dir.path().to_path_buf();
        if let Err(e) = temp_dir.close() {
            warn!("Failed to clean up {}: {}", temp_path.display(), e);
        }

        result?;
        info!("Finished backup {}", volume_name);
        Ok(backup_time)
    }

    fn create_and_store(&self, volume_path: &Path, volume_name: &str) -> Result<()> {
        let mut existing = BTreeSet::new();
        let mut creator = self.volume.create_new(volume_path)?;

        if let Err(e) = self.scope.add_files(&self.root, creator.as_mut(), &mut existing) {
            if let Err(close_err) = creator.close() {
                debug!("Failed to close {} after error: {}", volume_name, close_err);
            }
            return Err(e);
        }
        let file_count = creator.file_count();
        creator.close()?;

        if file_count > 0 {
            debug!(file_count, "Storing {}", volume_name);
            self.storage.store_file(volume_path, volume_name)?;
            self.storage.update_last_backup(&[volume_name.to_string()])?;
            self.history
                .process_historic_backups(self.storage.as_ref(), volume_name)?;
        } else {
            info!("Nothing changed, skipping empty container {}", volume_name);
        }

        debug!("Recording {} existing files", existing.len());
        self.storage.update_existing_files_metadata(&existing)?;

        let version = version::home_version(&self.root);
        debug!("Recording version {:?}", version);
        self.storage.update_version_info(version.as_deref())?;

        Ok(())
    }
}
