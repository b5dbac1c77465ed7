use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard};

/// Outcome of the most recent backups, shared between the worker and its
/// triggers.
#[derive(Debug, Default)]
pub struct BackupStatus {
    inner: Mutex<StatusSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub last_backup: Option<DateTime<Utc>>,
    pub last_full_backup: Option<DateTime<Utc>>,
    pub failed: bool,
}

impl BackupStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StatusSnapshot> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        *self.lock()
    }

    pub fn last_backup(&self) -> Option<DateTime<Utc>> {
        self.lock().last_backup
    }

    pub fn last_full_backup(&self) -> Option<DateTime<Utc>> {
        self.lock().last_full_backup
    }

    pub fn last_backup_failed(&self) -> bool {
        self.lock().failed
    }

    pub fn record_success(&self, time: DateTime<Utc>, full: bool) {
        let mut status = self.lock();
        status.last_backup = Some(time);
        if full {
            status.last_full_backup = Some(time);
        }
        status.failed = false;
    }

    pub fn record_failure(&self) {
        self.lock().failed = true;
    }

    /// Treat the home directory as backed up at `time`, e.g. right after it
    /// was restored.
    pub fn mark_up_to_date(&self, time: DateTime<Utc>) {
        let mut status = self.lock();
        status.last_backup = Some(time);
        status.last_full_backup = Some(time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_success_clears_failure() {
        let status = BackupStatus::new();
        assert_eq!(status.snapshot(), StatusSnapshot::default());

        let full = Utc::now();
        status.record_failure();
        status.record_success(full, true);
        assert!(!status.last_backup_failed());
        assert_eq!(status.last_full_backup(), Some(full));

        let incremental = full + Duration::minutes(3);
        status.record_success(incremental, false);
        assert_eq!(status.last_backup(), Some(incremental));
        assert_eq!(status.last_full_backup(), Some(full));

        status.record_failure();
        assert!(status.last_backup_failed());
        assert_eq!(status.last_backup(), Some(incremental));
    }
}
