use super::Storage;
use crate::utils::Result;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Wraps a storage so that recording a backup appends to the current
/// manifest instead of replacing it. Everything else is forwarded.
pub struct IncrementalBackupStorage {
    inner: Arc<dyn Storage>,
}

impl IncrementalBackupStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Self {
        Self { inner }
    }
}

impl Storage for IncrementalBackupStorage {
    fn store_file(&self, local_file: &Path, name: &str) -> Result<()> {
        self.inner.store_file(local_file, name)
    }

    fn load_file(&self, name: &str, target: &Path) -> Result<()> {
        self.inner.load_file(name, target)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(name)
    }

    fn list_files(&self) -> Result<Vec<String>> {
        self.inner.list_files()
    }

    fn find_latest_backup(&self) -> Result<Option<Vec<String>>> {
        self.inner.find_latest_backup()
    }

    fn list_metadata_for_existing_files(&self) -> Result<Vec<String>> {
        self.inner.list_metadata_for_existing_files()
    }

    fn update_last_backup(&self, names: &[String]) -> Result<()> {
        let mut latest = self.inner.find_latest_backup()?.unwrap_or_default();
        for name in names {
            // a container rewritten within the same second is already listed
            if latest.last() != Some(name) {
                latest.push(name.clone());
            }
        }
        self.inner.update_last_backup(&latest)
    }

    fn update_existing_files_metadata(&self, names: &BTreeSet<String>) -> Result<()> {
        self.inner.update_existing_files_metadata(names)
    }

    fn version_info(&self) -> Result<Option<String>> {
        self.inner.version_info()
    }

    fn update_version_info(&self, version: Option<&str>) -> Result<()> {
        self.inner.update_version_info(version)
    }
}
