//! Restore of the latest backup.
//!
//! Containers are fetched concurrently but extracted strictly in manifest
//! order. Each container task owns the receiving end of a oneshot channel
//! from its predecessor and the sending end towards its successor; the
//! [`ExistingFiles`] decision map travels down that chain, so only the task
//! holding it may extract. A failed task drops its sender, which interrupts
//! every later task without any of them touching the home directory.

use super::backup::scratch_temp_dir;
use crate::initiation::InitiationStrategy;
use crate::scope::{ExistingFiles, Scope};
use crate::storage::Storage;
use crate::utils::{BackupError, Result};
use crate::version;
use crate::volume::Volume;
use futures_util::future::join_all;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;
const TMP_DIR_PREFIX: &str = "restore-";

pub struct RestoreProcedure {
    volume: Arc<dyn Volume>,
    scope: Arc<dyn Scope>,
    storage: Option<Arc<dyn Storage>>,
    initiation: Arc<dyn InitiationStrategy>,
    root: PathBuf,
    scratch_dir: Option<PathBuf>,
    overwrite: bool,
    max_concurrent_fetches: usize,
}

/// Everything one container task needs, moved into the task.
struct ChainLink {
    name: String,
    volume_path: PathBuf,
    volume: Arc<dyn Volume>,
    scope: Arc<dyn Scope>,
    storage: Arc<dyn Storage>,
    fetch_permits: Arc<Semaphore>,
    root: PathBuf,
    overwrite: bool,
}

impl RestoreProcedure {
    /// Without a storage there is nothing to restore and every run starts a
    /// new environment.
    pub fn new(
        volume: Arc<dyn Volume>,
        scope: Arc<dyn Scope>,
        storage: Option<Arc<dyn Storage>>,
        initiation: Arc<dyn InitiationStrategy>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            volume,
            scope,
            storage,
            initiation,
            root: root.into(),
            scratch_dir: None,
            overwrite: false,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Replace files already present in the home directory.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    /// Restore the latest backup into the home directory.
    ///
    /// Returns the id of the last restored container, or `None` when a new
    /// environment was initialized instead.
    pub async fn perform_restore(&self) -> Result<Option<String>> {
        let Some(storage) = self.storage.clone() else {
            info!("No storage configured, nothing to restore");
            self.initialize_new_environment().await?;
            return Ok(None);
        };

        let lookup = storage.clone();
        let (latest, existing) = task::spawn_blocking(move || -> Result<_> {
            Ok((
                lookup.find_latest_backup()?,
                lookup.list_metadata_for_existing_files()?,
            ))
        })
        .await??;

        let names = match latest {
            Some(names) if !names.is_empty() => names,
            _ => {
                info!("No backup found, starting with a new environment");
                self.initialize_new_environment().await?;
                return Ok(None);
            }
        };
        let last_backup_id = names[names.len() - 1].clone();
        info!(
            containers = names.len(),
            existing = existing.len(),
            "Restoring {} from {}",
            self.root.display(),
            last_backup_id
        );

        let temp_dir = scratch_temp_dir(self.scratch_dir.as_deref(), TMP_DIR_PREFIX)?;
        let result = self
            .restore_containers(storage.clone(), &names, ExistingFiles::from_names(existing), temp_dir.path())
            .await;

        let temp_path = temp_dir.path().to_path_buf();
        if let Err(e) = temp_dir.close() {
            warn!("Failed to clean up {}: {}", temp_path.display(), e);
        }
        result?;

        self.check_version(storage).await;

        let initiation = self.initiation.clone();
        let root = self.root.clone();
        let id = last_backup_id.clone();
        task::spawn_blocking(move || initiation.initialize_restored_environment(&root, &id)).await??;

        info!("Restore of {} finished", last_backup_id);
        Ok(Some(last_backup_id))
    }

    async fn initialize_new_environment(&self) -> Result<()> {
        let initiation = self.initiation.clone();
        let root = self.root.clone();
        task::spawn_blocking(move || initiation.initialize_new_environment(&root)).await?
    }

    async fn restore_containers(
        &self,
        storage: Arc<dyn Storage>,
        names: &[String],
        existing: ExistingFiles,
        temp_dir: &Path,
    ) -> Result<()> {
        let fetch_permits = Arc::new(Semaphore::new(self.max_concurrent_fetches));

        let (head, mut previous) = oneshot::channel();
        if head.send(existing).is_err() {
            return Err(BackupError::ChainInterrupted("restore chain".to_string()));
        }

        let mut handles: Vec<JoinHandle<Result<()>>> = Vec::with_capacity(names.len());
        for (index, name) in names.iter().enumerate() {
            let (next, following) = oneshot::channel();
            let link = ChainLink {
                name: name.clone(),
                // manifest names may repeat or contain separators
                volume_path: temp_dir.join(format!("{:04}.{}", index, self.volume.file_extension())),
                volume: self.volume.clone(),
                scope: self.scope.clone(),
                storage: storage.clone(),
                fetch_permits: fetch_permits.clone(),
                root: self.root.clone(),
                overwrite: self.overwrite,
            };
            handles.push(tokio::spawn(link.run(previous, next)));
            previous = following;
        }

        // Await every task so none outlives the scratch directory.
        let outcomes = join_all(handles).await;

        let mut first_error = None;
        for (name, outcome) in names.iter().zip(outcomes) {
            if let Err(e) = outcome.map_err(BackupError::from).and_then(|result| result) {
                if e.is_chain_interruption() {
                    debug!("Skipped {}: {}", name, e);
                } else {
                    error!("Failed to restore {}: {}", name, e);
                }
                first_error.get_or_insert(e);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if let Ok(existing) = previous.await {
            debug!("Restore decided on {} names", existing.len());
        }
        Ok(())
    }

    async fn check_version(&self, storage: Arc<dyn Storage>) {
        let root = self.root.clone();
        let versions = task::spawn_blocking(move || {
            storage
                .version_info()
                .map(|stored| (stored, version::home_version(&root)))
        })
        .await;

        match versions {
            Ok(Ok((stored, restored))) if stored != restored => warn!(
                "Stored version {:?} differs from restored home version {:?}",
                stored, restored
            ),
            Ok(Ok((stored, _))) => debug!("Home version {:?}", stored),
            Ok(Err(e)) => warn!("Could not read stored version: {}", e),
            Err(e) => warn!("Version check failed: {}", e),
        }
    }
}

impl ChainLink {
    async fn run(
        self,
        previous: oneshot::Receiver<ExistingFiles>,
        next: oneshot::Sender<ExistingFiles>,
    ) -> Result<()> {
        let result = match self.fetch_and_extract(previous).await {
            Ok(existing) => {
                if next.send(existing).is_err() {
                    debug!("No container follows {}", self.name);
                }
                Ok(())
            }
            // dropping `next` interrupts the rest of the chain
            Err(e) => Err(e),
        };

        match tokio::fs::remove_file(&self.volume_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove {}: {}", self.volume_path.display(), e),
        }

        result
    }

    async fn fetch_and_extract(&self, previous: oneshot::Receiver<ExistingFiles>) -> Result<ExistingFiles> {
        {
            let _permit = self
                .fetch_permits
                .acquire()
                .await
                .map_err(|e| BackupError::Task(e.to_string()))?;
            debug!("Fetching {} to {}", self.name, self.volume_path.display());
            let storage = self.storage.clone();
            let name = self.name.clone();
            let target = self.volume_path.clone();
            task::spawn_blocking(move || storage.load_file(&name, &target)).await??;
        }

        let existing = previous
            .await
            .map_err(|_| BackupError::ChainInterrupted(self.name.clone()))?;

        debug!("Extracting {}", self.name);
        let volume = self.volume.clone();
        let scope = self.scope.clone();
        let volume_path = self.volume_path.clone();
        let root = self.root.clone();
        let overwrite = self.overwrite;
        task::spawn_blocking(move || -> Result<ExistingFiles> {
            let mut existing = existing;
            let mut extractor = volume.extract(&volume_path)?;
            let extracted = scope.extract_files(&root, extractor.as_ref(), overwrite, &mut existing);
            let closed = extractor.close();
            extracted?;
            closed?;
            Ok(existing)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BackupProcedure;
    use crate::fs::EntryKind;
    use crate::history::KeepAllBackupHistory;
    use crate::scope::{DefaultScope, IncrementalScope};
    use crate::storage::{IncrementalBackupStorage, LocalFileStorage};
    use crate::volume::{VolumeCreator, VolumeEntry, VolumeExtractor, ZipVolume};
    use chrono::{Duration, Utc};
    use rand::Rng;
    use std::collections::BTreeSet;
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tempfile::TempDir;

    /// Serves containers whose content is their own name, after a random
    /// delay so fetches finish out of order.
    struct FakeStorage {
        manifest: Option<Vec<String>>,
        failing: Option<String>,
    }

    impl FakeStorage {
        fn with_containers(names: &[&str]) -> Self {
            Self {
                manifest: Some(names.iter().map(|n| n.to_string()).collect()),
                failing: None,
            }
        }
    }

    impl Storage for FakeStorage {
        fn store_file(&self, _local_file: &Path, _name: &str) -> Result<()> {
            Ok(())
        }

        fn load_file(&self, name: &str, target: &Path) -> Result<()> {
            let delay = rand::thread_rng().gen_range(0..30);
            std::thread::sleep(std::time::Duration::from_millis(delay));
            if self.failing.as_deref() == Some(name) {
                return Err(io::Error::new(io::ErrorKind::Other, format!("cannot fetch {}", name)).into());
            }
            fs::write(target, name)?;
            Ok(())
        }

        fn delete_file(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        fn list_files(&self) -> Result<Vec<String>> {
            Ok(self.manifest.clone().unwrap_or_default())
        }

        fn find_latest_backup(&self) -> Result<Option<Vec<String>>> {
            Ok(self.manifest.clone())
        }

        fn list_metadata_for_existing_files(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn update_last_backup(&self, _names: &[String]) -> Result<()> {
            Ok(())
        }

        fn update_existing_files_metadata(&self, _names: &BTreeSet<String>) -> Result<()> {
            Ok(())
        }

        fn version_info(&self) -> Result<Option<String>> {
            Ok(None)
        }

        fn update_version_info(&self, _version: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    /// Each fetched container holds a single entry named after it.
    struct FakeVolume;

    struct FakeExtractor {
        container: String,
    }

    struct FakeEntry<'a> {
        name: &'a str,
    }

    impl Volume for FakeVolume {
        fn file_extension(&self) -> &str {
            "fake"
        }

        fn create_new(&self, path: &Path) -> Result<Box<dyn VolumeCreator>> {
            Err(BackupError::VolumeClosed(path.to_path_buf()))
        }

        fn extract(&self, path: &Path) -> Result<Box<dyn VolumeExtractor>> {
            Ok(Box::new(FakeExtractor {
                container: fs::read_to_string(path)?,
            }))
        }
    }

    impl VolumeExtractor for FakeExtractor {
        fn entries(&self) -> Result<Vec<Box<dyn VolumeEntry + '_>>> {
            Ok(vec![Box::new(FakeEntry {
                name: &self.container,
            })])
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl VolumeEntry for FakeEntry<'_> {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> EntryKind {
            EntryKind::File
        }

        fn extract_to(&self, _target: &Path, _overwrite: bool) -> Result<()> {
            Ok(())
        }
    }

    /// Records the entries it is asked to extract, in order.
    #[derive(Default)]
    struct RecordingScope {
        extracted: Mutex<Vec<String>>,
    }

    impl Scope for RecordingScope {
        fn add_files(
            &self,
            _root: &Path,
            _creator: &mut dyn VolumeCreator,
            _existing: &mut BTreeSet<String>,
        ) -> Result<()> {
            Ok(())
        }

        fn extract_files(
            &self,
            _root: &Path,
            extractor: &dyn VolumeExtractor,
            _overwrite: bool,
            _existing: &mut ExistingFiles,
        ) -> Result<()> {
            let mut extracted = self.extracted.lock().unwrap();
            for entry in extractor.entries()? {
                extracted.push(entry.name().to_string());
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingInitiation {
        new_environment: AtomicBool,
        restored: Mutex<Option<String>>,
    }

    impl InitiationStrategy for RecordingInitiation {
        fn initialize_new_environment(&self, _root: &Path) -> Result<()> {
            self.new_environment.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn initialize_restored_environment(&self, _root: &Path, last_backup_id: &str) -> Result<()> {
            *self.restored.lock().unwrap() = Some(last_backup_id.to_string());
            Ok(())
        }
    }

    const CONTAINERS: [&str; 5] = ["C1", "C2", "C3", "C4", "C5"];

    fn procedure(
        storage: Option<FakeStorage>,
        scope: &Arc<RecordingScope>,
        initiation: &Arc<RecordingInitiation>,
        temp_dir: &TempDir,
    ) -> RestoreProcedure {
        RestoreProcedure::new(
            Arc::new(FakeVolume),
            scope.clone(),
            storage.map(|s| Arc::new(s) as Arc<dyn Storage>),
            initiation.clone(),
            temp_dir.path().join("home"),
        )
        .with_scratch_dir(temp_dir.path().join("scratch"))
        .with_max_concurrent_fetches(3)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_extracts_in_manifest_order() -> Result<()> {
        for _ in 0..5 {
            let temp_dir = TempDir::new()?;
            let scope = Arc::new(RecordingScope::default());
            let initiation = Arc::new(RecordingInitiation::default());

            let restored = procedure(
                Some(FakeStorage::with_containers(&CONTAINERS)),
                &scope,
                &initiation,
                &temp_dir,
            )
            .perform_restore()
            .await?;

            assert_eq!(restored.as_deref(), Some("C5"));
            assert_eq!(*scope.extracted.lock().unwrap(), CONTAINERS);
            assert_eq!(initiation.restored.lock().unwrap().as_deref(), Some("C5"));
            assert!(!initiation.new_environment.load(Ordering::SeqCst));

            // scratch containers are gone
            assert_eq!(fs::read_dir(temp_dir.path().join("scratch"))?.count(), 0);
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_interrupts_later_containers() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let scope = Arc::new(RecordingScope::default());
        let initiation = Arc::new(RecordingInitiation::default());
        let mut storage = FakeStorage::with_containers(&CONTAINERS);
        storage.failing = Some("C3".to_string());

        let result = procedure(Some(storage), &scope, &initiation, &temp_dir)
            .perform_restore()
            .await;

        assert!(matches!(result, Err(BackupError::Io(_))));
        assert_eq!(*scope.extracted.lock().unwrap(), ["C1", "C2"]);
        assert_eq!(*initiation.restored.lock().unwrap(), None);
        assert!(!initiation.new_environment.load(Ordering::SeqCst));
        assert_eq!(fs::read_dir(temp_dir.path().join("scratch"))?.count(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_without_storage_starts_new_environment() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let scope = Arc::new(RecordingScope::default());
        let initiation = Arc::new(RecordingInitiation::default());

        let restored = procedure(None, &scope, &initiation, &temp_dir)
            .perform_restore()
            .await?;

        assert_eq!(restored, None);
        assert!(initiation.new_environment.load(Ordering::SeqCst));
        assert!(scope.extracted.lock().unwrap().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_empty_manifest_starts_new_environment() -> Result<()> {
        for manifest in [None, Some(Vec::new())] {
            let temp_dir = TempDir::new()?;
            let scope = Arc::new(RecordingScope::default());
            let initiation = Arc::new(RecordingInitiation::default());
            let storage = FakeStorage {
                manifest,
                failing: None,
            };

            let restored = procedure(Some(storage), &scope, &initiation, &temp_dir)
                .perform_restore()
                .await?;

            assert_eq!(restored, None);
            assert!(initiation.new_environment.load(Ordering::SeqCst));
            assert_eq!(*initiation.restored.lock().unwrap(), None);
        }
        Ok(())
    }

    fn set_mtime(path: &Path, time: SystemTime) -> io::Result<()> {
        fs::File::options().write(true).open(path)?.set_modified(time)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_and_incremental_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let home = temp_dir.path().join("home");
        let scratch = temp_dir.path().join("scratch");
        fs::create_dir_all(home.join("jobs/app"))?;
        fs::write(home.join("config.xml"), "v1")?;
        fs::write(home.join("jobs/app/config.xml"), "job")?;
        fs::write(home.join("obsolete.xml"), "old")?;

        let old = SystemTime::now() - std::time::Duration::from_secs(7200);
        for name in ["config.xml", "jobs/app/config.xml", "obsolete.xml"] {
            set_mtime(&home.join(name), old)?;
        }

        let storage = Arc::new(LocalFileStorage::new(temp_dir.path().join("storage")));
        let full_time = Utc::now() - Duration::hours(1);
        BackupProcedure::new(
            Arc::new(ZipVolume),
            Arc::new(DefaultScope::new()?),
            storage.clone(),
            Arc::new(KeepAllBackupHistory),
            &home,
        )
        .with_scratch_dir(&scratch)
        .perform_backup_at(full_time)?;

        fs::write(home.join("config.xml"), "v2")?;
        fs::remove_file(home.join("obsolete.xml"))?;

        let base: Arc<dyn Scope> = Arc::new(DefaultScope::new()?);
        BackupProcedure::new(
            Arc::new(ZipVolume),
            Arc::new(IncrementalScope::new(base, full_time)),
            Arc::new(IncrementalBackupStorage::new(storage.clone())),
            Arc::new(KeepAllBackupHistory),
            &home,
        )
        .with_scratch_dir(&scratch)
        .with_suffix("-incremental")
        .perform_backup()?;

        let manifest = storage.find_latest_backup()?.unwrap();
        assert_eq!(manifest.len(), 2);

        let target = temp_dir.path().join("restored");
        let initiation = Arc::new(RecordingInitiation::default());
        let restored = RestoreProcedure::new(
            Arc::new(ZipVolume),
            Arc::new(DefaultScope::new()?),
            Some(storage.clone() as Arc<dyn Storage>),
            initiation.clone(),
            &target,
        )
        .with_scratch_dir(&scratch)
        .perform_restore()
        .await?;

        assert_eq!(restored.as_ref(), manifest.last());
        assert_eq!(fs::read_to_string(target.join("config.xml"))?, "v2");
        assert_eq!(fs::read_to_string(target.join("jobs/app/config.xml"))?, "job");
        assert!(!target.join("obsolete.xml").exists());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_repeated_manifest_name_restores() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let home = temp_dir.path().join("home");
        let scratch = temp_dir.path().join("scratch");
        fs::create_dir_all(&home)?;
        fs::write(home.join("config.xml"), "backed up")?;

        let storage = Arc::new(LocalFileStorage::new(temp_dir.path().join("storage")));
        BackupProcedure::new(
            Arc::new(ZipVolume),
            Arc::new(DefaultScope::new()?),
            storage.clone(),
            Arc::new(KeepAllBackupHistory),
            &home,
        )
        .with_scratch_dir(&scratch)
        .perform_backup()?;

        let name = storage.find_latest_backup()?.unwrap().remove(0);
        storage.update_last_backup(&[name.clone(), name.clone()])?;

        for _ in 0..10 {
            let target = temp_dir.path().join("restored");
            let restored = RestoreProcedure::new(
                Arc::new(ZipVolume),
                Arc::new(DefaultScope::new()?),
                Some(storage.clone() as Arc<dyn Storage>),
                Arc::new(RecordingInitiation::default()),
                &target,
            )
            .with_scratch_dir(&scratch)
            .perform_restore()
            .await?;

            assert_eq!(restored.as_ref(), Some(&name));
            assert_eq!(fs::read_to_string(target.join("config.xml"))?, "backed up");
            fs::remove_dir_all(&target)?;
        }
        assert_eq!(fs::read_dir(&scratch)?.count(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_container_names_stay_inside_scratch() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let scope = Arc::new(RecordingScope::default());
        let initiation = Arc::new(RecordingInitiation::default());
        let names = ["../outside", "nested/C2"];

        let restored = procedure(
            Some(FakeStorage::with_containers(&names)),
            &scope,
            &initiation,
            &temp_dir,
        )
        .perform_restore()
        .await?;

        assert_eq!(restored.as_deref(), Some("nested/C2"));
        assert_eq!(*scope.extracted.lock().unwrap(), names);
        assert!(!temp_dir.path().join("outside").exists());

        Ok(())
    }

    #[tokio::test]
    async fn test_existing_files_survive_without_overwrite() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let home = temp_dir.path().join("home");
        fs::create_dir_all(&home)?;
        fs::write(home.join("config.xml"), "backed up")?;

        let storage = Arc::new(LocalFileStorage::new(temp_dir.path().join("storage")));
        BackupProcedure::new(
            Arc::new(ZipVolume),
            Arc::new(DefaultScope::new()?),
            storage.clone(),
            Arc::new(KeepAllBackupHistory),
            &home,
        )
        .perform_backup()?;

        fs::write(home.join("config.xml"), "local")?;
        let restore = |overwrite| {
            RestoreProcedure::new(
                Arc::new(ZipVolume),
                Arc::new(DefaultScope::new().unwrap()),
                Some(storage.clone() as Arc<dyn Storage>),
                Arc::new(RecordingInitiation::default()),
                &home,
            )
            .with_overwrite(overwrite)
        };

        restore(false).perform_restore().await?;
        assert_eq!(fs::read_to_string(home.join("config.xml"))?, "local");

        restore(true).perform_restore().await?;
        assert_eq!(fs::read_to_string(home.join("config.xml"))?, "backed up");

        Ok(())
    }
}
