use super::manifest::{self, EXISTING_FILES_METADATA, LAST_BACKUP_FILE, VERSION_FILE};
use super::Storage;
use crate::utils::Result;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

/// Keeps containers and bookkeeping files in a local directory.
///
/// The directory is created on first write.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    dir: PathBuf,
}

impl LocalFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_manifest(&self, name: &str) -> Result<Option<Vec<String>>> {
        match fs::read_to_string(self.dir.join(name)) {
            Ok(content) => Ok(Some(manifest::parse(&content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace a bookkeeping file through a temp file in the same directory,
    /// so readers never see a partial manifest.
    fn write_manifest<I, S>(&self, name: &str, comment: &str, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        fs::create_dir_all(&self.dir)?;
        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(manifest::render(comment, entries).as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(self.dir.join(name)).map_err(|e| e.error)?;
        trace!("Updated {}", name);
        Ok(())
    }
}

impl Storage for LocalFileStorage {
    fn store_file(&self, local_file: &Path, name: &str) -> Result<()> {
        debug!("Storing {} as {}", local_file.display(), name);
        fs::create_dir_all(&self.dir)?;
        fs::copy(local_file, self.dir.join(name))?;
        Ok(())
    }

    fn load_file(&self, name: &str, target: &Path) -> Result<()> {
        debug!("Loading {} to {}", name, target.display());
        fs::copy(self.dir.join(name), target)?;
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        debug!("Deleting {}", name);
        fs::remove_file(self.dir.join(name))?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            // leftovers of interrupted manifest writes start with a dot
            if !manifest::is_bookkeeping(&name) && !name.starts_with('.') {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }

    fn find_latest_backup(&self) -> Result<Option<Vec<String>>> {
        Ok(self
            .read_manifest(LAST_BACKUP_FILE)?
            .filter(|names| !names.is_empty()))
    }

    fn list_metadata_for_existing_files(&self) -> Result<Vec<String>> {
        Ok(self.read_manifest(EXISTING_FILES_METADATA)?.unwrap_or_default())
    }

    fn update_last_backup(&self, names: &[String]) -> Result<()> {
        self.write_manifest(LAST_BACKUP_FILE, manifest::LAST_BACKUP_COMMENT, names)
    }

    fn update_existing_files_metadata(&self, names: &BTreeSet<String>) -> Result<()> {
        self.write_manifest(EXISTING_FILES_METADATA, manifest::EXISTING_FILES_COMMENT, names)
    }

    fn version_info(&self) -> Result<Option<String>> {
        Ok(self
            .read_manifest(VERSION_FILE)?
            .and_then(|lines| lines.into_iter().next()))
    }

    fn update_version_info(&self, version: Option<&str>) -> Result<()> {
        match version {
            Some(version) => self.write_manifest(VERSION_FILE, manifest::VERSION_COMMENT, [version]),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_load_delete() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let storage = LocalFileStorage::new(temp_dir.path().join("storage"));

        let source = temp_dir.path().join("backup.zip");
        fs::write(&source, b"container")?;
        storage.store_file(&source, "backup-1.zip")?;
        storage.update_last_backup(&["backup-1.zip".to_string()])?;

        assert_eq!(storage.list_files()?, vec!["backup-1.zip"]);

        let target = temp_dir.path().join("loaded.zip");
        storage.load_file("backup-1.zip", &target)?;
        assert_eq!(fs::read(&target)?, b"container");

        storage.delete_file("backup-1.zip")?;
        assert!(storage.list_files()?.is_empty());
        assert!(storage.delete_file("backup-1.zip").is_err());

        Ok(())
    }

    #[test]
    fn test_missing_bookkeeping_files() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let storage = LocalFileStorage::new(temp_dir.path().join("never-written"));

        assert!(storage.find_latest_backup()?.is_none());
        assert!(storage.list_metadata_for_existing_files()?.is_empty());
        assert!(storage.version_info()?.is_none());
        assert!(storage.list_files()?.is_empty());

        Ok(())
    }

    #[test]
    fn test_manifests_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let storage = LocalFileStorage::new(temp_dir.path());

        let names = vec!["backup-2.zip".to_string(), "backup-1.zip".to_string()];
        storage.update_last_backup(&names)?;
        assert_eq!(storage.find_latest_backup()?, Some(names));

        let existing: BTreeSet<String> = ["a", "b/c"].iter().map(|s| s.to_string()).collect();
        storage.update_existing_files_metadata(&existing)?;
        assert_eq!(storage.list_metadata_for_existing_files()?, vec!["a", "b/c"]);

        let content = fs::read_to_string(temp_dir.path().join(LAST_BACKUP_FILE))?;
        assert!(content.starts_with("# This file contains the filename of the last backup."));

        Ok(())
    }

    #[test]
    fn test_empty_manifest_means_no_backup() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let storage = LocalFileStorage::new(temp_dir.path());

        storage.update_last_backup(&[])?;
        assert!(storage.find_latest_backup()?.is_none());

        Ok(())
    }

    #[test]
    fn test_version_info() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let storage = LocalFileStorage::new(temp_dir.path());

        storage.update_version_info(Some("2.440.1"))?;
        assert_eq!(storage.version_info()?.as_deref(), Some("2.440.1"));

        storage.update_version_info(None)?;
        assert_eq!(storage.version_info()?.as_deref(), Some("2.440.1"));

        Ok(())
    }
}
