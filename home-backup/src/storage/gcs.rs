//! Google Cloud Storage backend driven through the `gsutil` command line
//! tool.

use super::manifest::{self, EXISTING_FILES_METADATA, LAST_BACKUP_FILE, VERSION_FILE};
use super::Storage;
use crate::utils::{BackupError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

pub const DEFAULT_COMMAND: &str = "gsutil";

/// Stores everything as objects directly below `gs://<bucket>/`.
#[derive(Debug, Clone)]
pub struct GcsStorage {
    url_prefix: String,
    program: String,
    leading_args: Vec<String>,
}

impl GcsStorage {
    pub fn new(bucket: &str) -> Self {
        Self::with_command(bucket, DEFAULT_COMMAND)
    }

    /// Use `command` instead of `gsutil`. The command is split on whitespace,
    /// so it may carry leading options, e.g. `gsutil -q`.
    pub fn with_command(bucket: &str, command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| DEFAULT_COMMAND.to_string());
        Self {
            url_prefix: format!("gs://{}/", bucket.trim_end_matches('/')),
            program,
            leading_args: parts.collect(),
        }
    }

    fn url(&self, name: &str) -> String {
        format!("{}{}", self.url_prefix, name)
    }

    fn gsutil(&self, args: &[&str]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .output()
            .map_err(|e| {
                BackupError::Storage(format!("failed to run {}: {}", self.program, e))
            })?;

        if !output.status.success() {
            let mut message = String::from_utf8_lossy(&output.stdout).into_owned();
            message.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(BackupError::Storage(format!(
                "{} {} failed ({}): {}",
                self.program,
                args.join(" "),
                output.status,
                message.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Read a bookkeeping object. Any failure reads as "not there".
    fn cat(&self, name: &str) -> Option<Vec<String>> {
        match self.gsutil(&["cat", &self.url(name)]) {
            Ok(content) => Some(manifest::parse(&content)),
            Err(e) => {
                debug!("Could not read {}: {}", name, e);
                None
            }
        }
    }

    fn upload_manifest<I, S>(&self, name: &str, comment: &str, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let temp_dir = tempfile::Builder::new().prefix("home-backup").tempdir()?;
        let local = temp_dir.path().join(name);
        fs::write(&local, manifest::render(comment, entries))?;
        self.store_file(&local, name)?;

        if let Err(e) = temp_dir.close() {
            warn!("Failed to clean up temporary manifest: {}", e);
        }
        Ok(())
    }
}

impl Storage for GcsStorage {
    fn store_file(&self, local_file: &Path, name: &str) -> Result<()> {
        debug!("Storing {} as {}", local_file.display(), self.url(name));
        self.gsutil(&["cp", &local_file.to_string_lossy(), &self.url(name)])?;
        Ok(())
    }

    fn load_file(&self, name: &str, target: &Path) -> Result<()> {
        debug!("Loading {} to {}", self.url(name), target.display());
        self.gsutil(&["cp", &self.url(name), &target.to_string_lossy()])?;
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        debug!("Deleting {}", self.url(name));
        self.gsutil(&["rm", &self.url(name)])?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let listing = self.gsutil(&["ls", &self.url_prefix])?;
        Ok(listing
            .lines()
            .filter_map(|line| line.trim().strip_prefix(self.url_prefix.as_str()))
            .filter(|name| !name.is_empty() && !manifest::is_bookkeeping(name))
            .map(str::to_string)
            .collect())
    }

    fn find_latest_backup(&self) -> Result<Option<Vec<String>>> {
        match self.cat(LAST_BACKUP_FILE) {
            Some(names) if !names.is_empty() => Ok(Some(names)),
            Some(_) => {
                debug!("Last backup manifest is empty, no backups available");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn list_metadata_for_existing_files(&self) -> Result<Vec<String>> {
        let names = self.cat(EXISTING_FILES_METADATA).unwrap_or_default();
        if names.is_empty() {
            warn!("No existing files recorded, every entry of the backup will be restored");
        }
        Ok(names)
    }

    fn update_last_backup(&self, names: &[String]) -> Result<()> {
        self.upload_manifest(LAST_BACKUP_FILE, manifest::LAST_BACKUP_COMMENT, names)
    }

    fn update_existing_files_metadata(&self, names: &BTreeSet<String>) -> Result<()> {
        self.upload_manifest(EXISTING_FILES_METADATA, manifest::EXISTING_FILES_COMMENT, names)
    }

    fn version_info(&self) -> Result<Option<String>> {
        Ok(self
            .cat(VERSION_FILE)
            .and_then(|lines| lines.into_iter().next()))
    }

    fn update_version_info(&self, version: Option<&str>) -> Result<()> {
        match version {
            Some(version) => {
                self.upload_manifest(VERSION_FILE, manifest::VERSION_COMMENT, [version])
            }
            None => Ok(()),
        }
    }
}
