//! Scheduling predicates deciding whether a backup is due.

use crate::daemon::BackupStatus;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, RwLock};

pub trait BackupTrigger: Send + Sync {
    fn should_create_backup(&self, last_backup: DateTime<Utc>) -> bool;
}

/// Fires once `interval` has passed since the last backup.
#[derive(Debug, Clone)]
pub struct PeriodicBackupTrigger {
    interval: Duration,
}

impl PeriodicBackupTrigger {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl BackupTrigger for PeriodicBackupTrigger {
    fn should_create_backup(&self, last_backup: DateTime<Utc>) -> bool {
        last_backup + self.interval <= Utc::now()
    }
}

/// Time of the most recent change to the home directory. The worker feeds
/// it from the top-level files of the home on every tick; an embedding host
/// may report changes it knows about directly.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    last_change: RwLock<Option<DateTime<Utc>>>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_change(&self) {
        self.record_change_at(Utc::now());
    }

    pub fn record_change_at(&self, time: DateTime<Utc>) {
        if let Ok(mut last_change) = self.last_change.write() {
            *last_change = Some(time);
        }
    }

    pub fn last_change(&self) -> Option<DateTime<Utc>> {
        self.last_change.read().ok().and_then(|time| *time)
    }

    /// Record the latest modification time of the regular files directly
    /// below `root`, except those named in `ignored`. The recorded change
    /// only ever moves forward. Returns the time found, if any.
    pub fn record_root_changes(&self, root: &Path, ignored: &[&str]) -> io::Result<Option<DateTime<Utc>>> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut latest: Option<DateTime<Utc>> = None;
        for entry in entries {
            let entry = entry?;
            if ignored.iter().any(|name| entry.file_name() == **name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = DateTime::<Utc>::from(metadata.modified()?);
            latest = latest.max(Some(modified));
        }

        if let Some(time) = latest {
            if self.last_change().map_or(true, |last| time > last) {
                self.record_change_at(time);
            }
        }
        Ok(latest)
    }
}

/// Fires when a change was recorded after the last backup.
pub struct ChangeSinceBackupTrigger {
    tracker: Arc<ChangeTracker>,
}

impl ChangeSinceBackupTrigger {
    pub fn new(tracker: Arc<ChangeTracker>) -> Self {
        Self { tracker }
    }
}

impl BackupTrigger for ChangeSinceBackupTrigger {
    fn should_create_backup(&self, last_backup: DateTime<Utc>) -> bool {
        self.tracker
            .last_change()
            .map(|change| change > last_backup)
            .unwrap_or(false)
    }
}

/// Fires when the previous backup attempt failed.
pub struct FailureBackupTrigger {
    status: Arc<BackupStatus>,
}

impl FailureBackupTrigger {
    pub fn new(status: Arc<BackupStatus>) -> Self {
        Self { status }
    }
}

impl BackupTrigger for FailureBackupTrigger {
    fn should_create_backup(&self, _last_backup: DateTime<Utc>) -> bool {
        self.status.last_backup_failed()
    }
}

struct AnyTrigger(Vec<Box<dyn BackupTrigger>>);

impl BackupTrigger for AnyTrigger {
    fn should_create_backup(&self, last_backup: DateTime<Utc>) -> bool {
        self.0.iter().any(|t| t.should_create_backup(last_backup))
    }
}

struct AllTrigger(Vec<Box<dyn BackupTrigger>>);

impl BackupTrigger for AllTrigger {
    fn should_create_backup(&self, last_backup: DateTime<Utc>) -> bool {
        self.0.iter().all(|t| t.should_create_backup(last_backup))
    }
}

/// Fires when any of `triggers` fires, checked left to right.
pub fn or(triggers: Vec<Box<dyn BackupTrigger>>) -> Box<dyn BackupTrigger> {
    Box::new(AnyTrigger(triggers))
}

/// Fires when all of `triggers` fire, checked left to right.
pub fn and(triggers: Vec<Box<dyn BackupTrigger>>) -> Box<dyn BackupTrigger> {
    Box::new(AllTrigger(triggers))
}
