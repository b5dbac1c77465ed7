//! Storage backends for containers and bookkeeping files.
//!
//! Besides the containers themselves a backend keeps three small files:
//! the manifest of the latest backup (`last-backup`), the names that existed
//! when it was taken (`existing-files-metadata`) and the version marker of
//! the home directory (`upgrade-version`).

pub mod gcs;
pub mod incremental;
pub mod local;
pub mod manifest;

use crate::utils::Result;
use std::collections::BTreeSet;
use std::path::Path;

pub use gcs::GcsStorage;
pub use incremental::IncrementalBackupStorage;
pub use local::LocalFileStorage;

pub trait Storage: Send + Sync {
    /// Upload `local_file` as `name`.
    fn store_file(&self, local_file: &Path, name: &str) -> Result<()>;

    /// Download `name` to `target`.
    fn load_file(&self, name: &str, target: &Path) -> Result<()>;

    fn delete_file(&self, name: &str) -> Result<()>;

    /// Names of all stored containers, bookkeeping files excluded.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Containers of the latest backup in replay order, or `None` when no
    /// backup has been recorded.
    fn find_latest_backup(&self) -> Result<Option<Vec<String>>>;

    /// Names recorded by the latest backup. Empty when none were recorded.
    fn list_metadata_for_existing_files(&self) -> Result<Vec<String>>;

    /// Replace the manifest of the latest backup.
    fn update_last_backup(&self, names: &[String]) -> Result<()>;

    fn update_existing_files_metadata(&self, names: &BTreeSet<String>) -> Result<()>;

    fn version_info(&self) -> Result<Option<String>>;

    /// Record the version marker. `None` leaves the stored marker unchanged.
    fn update_version_info(&self, version: Option<&str>) -> Result<()>;
}
