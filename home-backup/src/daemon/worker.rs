//! Periodic backup worker.
//!
//! Every tick the worker checks its triggers and runs at most one backup:
//! a full backup when none was taken yet or the full trigger fires, else an
//! incremental one when the incremental trigger fires. Backups and restores
//! share one [`OperationLock`].

use super::lock::OperationLock;
use super::status::BackupStatus;
use crate::executor::{
    container_time, BackupProcedure, RestoreProcedure, DEFAULT_MAX_CONCURRENT_FETCHES,
};
use crate::history::{KeepAllBackupHistory, KeepLatestBackupHistory};
use crate::initiation::RestoreLogStrategy;
use crate::scope::{DefaultScope, FilteringScope, IncrementalScope, Scope};
use crate::storage::{IncrementalBackupStorage, Storage};
use crate::trigger::{
    self, BackupTrigger, ChangeSinceBackupTrigger, ChangeTracker, FailureBackupTrigger,
    PeriodicBackupTrigger,
};
use crate::utils::{BackupError, Result};
use crate::volume::Volume;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Log file the `run` command writes into the home root. It changes on every
/// tick, so it is never part of an incremental backup.
pub const WORKER_LOG_FILE: &str = "backup-worker.log";
pub const INCREMENTAL_SUFFIX: &str = "-incremental";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => write!(f, "full"),
            BackupKind::Incremental => write!(f, "incremental"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub root: PathBuf,
    pub scratch_dir: PathBuf,
    pub full_interval: chrono::Duration,
    pub incremental_interval: chrono::Duration,
    pub check_interval: Duration,
    pub overwrite: bool,
    pub max_concurrent_fetches: usize,
}

impl WorkerSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            scratch_dir: root.join("backup-tmp"),
            root,
            full_interval: chrono::Duration::hours(1),
            incremental_interval: chrono::Duration::minutes(3),
            check_interval: Duration::from_secs(60),
            overwrite: false,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

pub struct BackupWorker {
    settings: WorkerSettings,
    volume: Arc<dyn Volume>,
    scope: Arc<dyn Scope>,
    storage: Arc<dyn Storage>,
    status: Arc<BackupStatus>,
    changes: Arc<ChangeTracker>,
    lock: Arc<OperationLock>,
    restore_strategy: Arc<RestoreLogStrategy>,
    full_trigger: Box<dyn BackupTrigger>,
    incremental_trigger: Box<dyn BackupTrigger>,
}

impl BackupWorker {
    pub fn new(
        settings: WorkerSettings,
        volume: Arc<dyn Volume>,
        scope: Arc<dyn Scope>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let status = Arc::new(BackupStatus::new());
        let changes = Arc::new(ChangeTracker::new());

        let full_trigger = trigger::or(vec![
            Box::new(FailureBackupTrigger::new(status.clone())),
            Box::new(PeriodicBackupTrigger::new(settings.full_interval)),
        ]);
        let incremental_trigger = trigger::or(vec![
            Box::new(ChangeSinceBackupTrigger::new(changes.clone())),
            Box::new(PeriodicBackupTrigger::new(settings.incremental_interval)),
        ]);

        Self {
            settings,
            volume,
            scope,
            storage,
            status,
            changes,
            lock: OperationLock::new(),
            restore_strategy: Arc::new(RestoreLogStrategy::new()),
            full_trigger,
            incremental_trigger,
        }
    }

    pub fn status(&self) -> &Arc<BackupStatus> {
        &self.status
    }

    /// Tracker of home directory changes, fed on every tick and open to
    /// reports from an embedding host.
    pub fn change_tracker(&self) -> &Arc<ChangeTracker> {
        &self.changes
    }

    pub fn lock(&self) -> &Arc<OperationLock> {
        &self.lock
    }

    /// Whether a restore replaced data the running host had already loaded.
    pub fn restart_required(&self) -> bool {
        self.restore_strategy.restart_required()
    }

    /// Which backup is due now, if any.
    pub fn next_backup_kind(&self) -> Option<BackupKind> {
        let status = self.status.snapshot();
        let last_full = match status.last_full_backup {
            None => return Some(BackupKind::Full),
            Some(time) => time,
        };
        if self.full_trigger.should_create_backup(last_full) {
            return Some(BackupKind::Full);
        }

        let last_backup = status.last_backup.unwrap_or(last_full);
        self.incremental_trigger
            .should_create_backup(last_backup)
            .then_some(BackupKind::Incremental)
    }

    fn backup_procedure(&self, kind: BackupKind) -> BackupProcedure {
        let procedure = match kind {
            BackupKind::Full => BackupProcedure::new(
                self.volume.clone(),
                self.scope.clone(),
                self.storage.clone(),
                Arc::new(KeepLatestBackupHistory),
                &self.settings.root,
            ),
            BackupKind::Incremental => {
                let since = self
                    .status
                    .last_backup()
                    .or_else(|| self.status.last_full_backup())
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                let changed: Arc<dyn Scope> =
                    Arc::new(IncrementalScope::new(self.scope.clone(), since));
                BackupProcedure::new(
                    self.volume.clone(),
                    Arc::new(
                        FilteringScope::new(changed)
                            .with_exclusion(WORKER_LOG_FILE)
                            // as named through a configured multi-scope
                            .with_exclusion(format!("{}/{}", DefaultScope::NAME, WORKER_LOG_FILE)),
                    ),
                    Arc::new(IncrementalBackupStorage::new(self.storage.clone())),
                    Arc::new(KeepAllBackupHistory),
                    &self.settings.root,
                )
                .with_suffix(INCREMENTAL_SUFFIX)
            }
        };
        procedure.with_scratch_dir(&self.settings.scratch_dir)
    }

    /// Run a backup of `kind` under the operation lock and record its
    /// outcome. Returns the backup time.
    pub async fn run_backup(&self, kind: BackupKind) -> Result<DateTime<Utc>> {
        let guard = self.lock.try_acquire("backup")?;
        let procedure = self.backup_procedure(kind);

        info!(%kind, "Backup started");
        let result = task::spawn_blocking(move || {
            let _guard = guard;
            procedure.perform_backup()
        })
        .await
        .map_err(BackupError::from)
        .and_then(|result| result);

        match &result {
            Ok(time) => {
                self.status.record_success(*time, kind == BackupKind::Full);
                info!(%kind, "Backup finished");
            }
            Err(e) => {
                self.status.record_failure();
                error!(%kind, "Backup failed: {}", e);
            }
        }
        result
    }

    /// One scheduling tick. Returns the kind of backup taken, if any.
    pub async fn run_once(&self) -> Result<Option<BackupKind>> {
        self.scan_root_changes().await;
        let Some(kind) = self.next_backup_kind() else {
            debug!("No backup due");
            return Ok(None);
        };
        self.run_backup(kind).await?;
        Ok(Some(kind))
    }

    async fn scan_root_changes(&self) {
        let changes = self.changes.clone();
        let root = self.settings.root.clone();
        let scanned =
            task::spawn_blocking(move || changes.record_root_changes(&root, &[WORKER_LOG_FILE])).await;
        match scanned {
            Ok(Ok(Some(time))) => debug!("Latest home change at {}", time),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("Could not scan {} for changes: {}", self.settings.root.display(), e),
            Err(e) => warn!("Change scan failed: {}", e),
        }
    }

    /// Restore the latest backup into the home directory, under the
    /// operation lock. Returns the id of the last restored container.
    pub async fn auto_restore(&self) -> Result<Option<String>> {
        let _guard = self.lock.try_acquire("restore")?;

        let restored = RestoreProcedure::new(
            self.volume.clone(),
            self.scope.clone(),
            Some(self.storage.clone()),
            self.restore_strategy.clone(),
            &self.settings.root,
        )
        .with_scratch_dir(&self.settings.scratch_dir)
        .with_overwrite(self.settings.overwrite)
        .with_max_concurrent_fetches(self.settings.max_concurrent_fetches)
        .perform_restore()
        .await?;

        if restored.is_some() {
            self.status.mark_up_to_date(Utc::now());
        }
        Ok(restored)
    }

    /// Seed the status from storage: a stored backup means the home
    /// directory is current as of now.
    pub async fn load_status(&self) -> Result<()> {
        let storage = self.storage.clone();
        let latest = task::spawn_blocking(move || storage.find_latest_backup()).await??;
        if latest.is_some_and(|names| !names.is_empty()) {
            debug!("Storage holds a backup, treating home as backed up");
            self.status.mark_up_to_date(Utc::now());
        }
        Ok(())
    }

    /// Seed the status from the times encoded in the latest manifest: its
    /// first container is the full backup, its last the latest backup.
    /// Returns whether a backup was found.
    pub async fn load_status_from_manifest(&self) -> Result<bool> {
        let storage = self.storage.clone();
        let latest = task::spawn_blocking(move || storage.find_latest_backup()).await??;
        let times: Vec<DateTime<Utc>> = latest
            .unwrap_or_default()
            .iter()
            .filter_map(|name| container_time(name))
            .collect();

        match (times.first(), times.last()) {
            (Some(&full), Some(&last)) => {
                self.status.record_success(full, true);
                self.status.record_success(last, full == last);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Check the triggers every `check_interval` until `shutdown` is
    /// cancelled, then take a final backup unless a restart is pending.
    pub async fn run_periodic(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.settings.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Backup worker started, checking every {:?}",
            self.settings.check_interval
        );
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!("Backup tick failed: {}", e);
                    }
                }
            }
        }

        self.final_backup().await;
        info!("Backup worker stopped");
    }

    async fn final_backup(&self) {
        if self.restart_required() {
            info!("Restart pending after restore, skipping final backup");
            return;
        }

        let kind = match self.status.last_full_backup() {
            None => BackupKind::Full,
            Some(_) => BackupKind::Incremental,
        };
        if let Err(e) = self.run_backup(kind).await {
            warn!("Final backup failed: {}", e);
        }
    }
}
