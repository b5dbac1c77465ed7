//! Scopes backed by a directory walk.

use super::{add_all_files_in, extract_all_files_to, ExistingFiles, Scope};
use crate::fs::WalkOptions;
use crate::utils::{BackupError, Result};
use crate::volume::{VolumeCreator, VolumeExtractor};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Paths below the home root that are never backed up.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    // scratch space of build containers
    "container-tmp",
    "garbage",
    // owned by backup and restore
    "backup-tmp",
    ".restore.log",
    "lost+found",
    // caches and build outputs
    ".m2",
    "workspace",
    "war",
    "jobs/*/branches/*/workspace",
];

/// The whole home root minus [`DEFAULT_EXCLUSIONS`].
#[derive(Debug, Clone)]
pub struct DefaultScope {
    options: WalkOptions,
}

impl DefaultScope {
    pub const NAME: &'static str = "default";

    pub fn new() -> Result<Self> {
        Ok(Self {
            options: WalkOptions::with_exclusions(DEFAULT_EXCLUSIONS)?,
        })
    }
}

impl Scope for DefaultScope {
    fn add_files(
        &self,
        root: &Path,
        creator: &mut dyn VolumeCreator,
        existing: &mut BTreeSet<String>,
    ) -> Result<()> {
        add_all_files_in(root, creator, existing, &self.options)
    }

    fn extract_files(
        &self,
        root: &Path,
        extractor: &dyn VolumeExtractor,
        overwrite: bool,
        existing: &mut ExistingFiles,
    ) -> Result<()> {
        extract_all_files_to(root, extractor, overwrite, existing)
    }
}

/// A user-defined sub-directory of the home root with its own exclusions.
///
/// Entry names and exclusions are relative to the sub-directory.
#[derive(Debug, Clone)]
pub struct CustomScope {
    name: String,
    path: PathBuf,
    options: WalkOptions,
}

impl CustomScope {
    pub fn new<S: AsRef<str>>(name: &str, path: &Path, excludes: &[S]) -> Result<Self> {
        let contained = path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(BackupError::Config(format!(
                "scope '{}': path must be relative to the home root: {}",
                name,
                path.display()
            )));
        }

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            options: WalkOptions::with_exclusions(excludes)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Scope for CustomScope {
    fn add_files(
        &self,
        root: &Path,
        creator: &mut dyn VolumeCreator,
        existing: &mut BTreeSet<String>,
    ) -> Result<()> {
        add_all_files_in(&root.join(&self.path), creator, existing, &self.options)
    }

    fn extract_files(
        &self,
        root: &Path,
        extractor: &dyn VolumeExtractor,
        overwrite: bool,
        existing: &mut ExistingFiles,
    ) -> Result<()> {
        extract_all_files_to(&root.join(&self.path), extractor, overwrite, existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{Volume, ZipVolume};
    use std::fs;
    use tempfile::TempDir;

    fn backup(scope: &dyn Scope, root: &Path, volume_path: &Path) -> Result<(usize, BTreeSet<String>)> {
        let mut creator = ZipVolume.create_new(volume_path)?;
        let mut existing = BTreeSet::new();
        scope.add_files(root, creator.as_mut(), &mut existing)?;
        let count = creator.file_count();
        creator.close()?;
        Ok((count, existing))
    }

    #[test]
    fn test_default_scope_skips_exclusions() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("home");

        fs::create_dir_all(root.join("jobs/app/branches/main/workspace"))?;
        fs::create_dir_all(root.join("jobs/app/builds/1"))?;
        fs::create_dir_all(root.join("backup-tmp/backup-123"))?;
        fs::create_dir_all(root.join("workspace"))?;
        fs::create_dir_all(root.join("plugins"))?;
        fs::write(root.join("config.xml"), b"<hudson/>")?;
        fs::write(root.join(".restore.log"), b"log")?;
        fs::write(root.join("jobs/app/config.xml"), b"<job/>")?;
        fs::write(root.join("jobs/app/branches/main/workspace/a.o"), b"obj")?;
        fs::write(root.join("backup-tmp/backup-123/old.zip"), b"zip")?;
        fs::write(root.join("workspace/tmp"), b"tmp")?;

        let (count, existing) =
            backup(&DefaultScope::new()?, &root, &temp_dir.path().join("default.zip"))?;

        let names: Vec<&str> = existing.iter().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "config.xml",
                "jobs/app/builds/1",
                "jobs/app/config.xml",
                "plugins",
            ]
        );
        assert_eq!(count, 4);

        Ok(())
    }

    #[test]
    fn test_custom_scope_is_relative_to_its_path() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("home");
        let restored = temp_dir.path().join("restored");
        let volume_path = temp_dir.path().join("custom.zip");

        fs::create_dir_all(root.join("userContent/cache"))?;
        fs::write(root.join("userContent/readme.txt"), b"hello")?;
        fs::write(root.join("userContent/cache/blob"), b"cached")?;
        fs::write(root.join("outside.txt"), b"not in scope")?;

        let scope = CustomScope::new("content", Path::new("userContent"), &["cache"])?;
        assert_eq!(scope.name(), "content");

        let (_, existing) = backup(&scope, &root, &volume_path)?;
        assert_eq!(existing.into_iter().collect::<Vec<_>>(), vec!["readme.txt"]);

        let extractor = ZipVolume.extract(&volume_path)?;
        scope.extract_files(&restored, extractor.as_ref(), false, &mut ExistingFiles::new())?;
        assert_eq!(fs::read(restored.join("userContent/readme.txt"))?, b"hello");

        Ok(())
    }

    #[test]
    fn test_missing_custom_directory_contributes_nothing() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let scope = CustomScope::new("gone", Path::new("does/not/exist"), &[] as &[&str])?;

        let (count, existing) = backup(&scope, temp_dir.path(), &temp_dir.path().join("gone.zip"))?;
        assert_eq!(count, 0);
        assert!(existing.is_empty());

        Ok(())
    }

    #[test]
    fn test_custom_scope_rejects_escaping_paths() {
        assert!(CustomScope::new("abs", Path::new("/etc"), &[] as &[&str]).is_err());
        assert!(CustomScope::new("up", Path::new("../sibling"), &[] as &[&str]).is_err());
    }
}
