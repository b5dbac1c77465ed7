use super::{ExistingFiles, Scope};
use crate::utils::Result;
use crate::volume::{ForwardingCreator, VolumeCreator, VolumeExtractor};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Only stores entries modified strictly after `since`.
///
/// Entries without a readable modification time are stored.
pub struct IncrementalScope {
    inner: Arc<dyn Scope>,
    since: DateTime<Utc>,
}

impl IncrementalScope {
    pub fn new(inner: Arc<dyn Scope>, since: DateTime<Utc>) -> Self {
        Self { inner, since }
    }
}

impl Scope for IncrementalScope {
    fn add_files(
        &self,
        root: &Path,
        creator: &mut dyn VolumeCreator,
        existing: &mut BTreeSet<String>,
    ) -> Result<()> {
        let mut changed = ForwardingCreator::new(creator, |name, attrs| {
            let modified_after = attrs
                .modified()
                .map(|time| DateTime::<Utc>::from(time) > self.since)
                .unwrap_or(true);
            modified_after.then(|| name.to_string())
        });
        self.inner.add_files(root, &mut changed, existing)
    }

    fn extract_files(
        &self,
        root: &Path,
        extractor: &dyn VolumeExtractor,
        overwrite: bool,
        existing: &mut ExistingFiles,
    ) -> Result<()> {
        self.inner.extract_files(root, extractor, overwrite, existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::DefaultScope;
    use crate::volume::{Volume, ZipVolume};
    use std::fs::{self, File};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tempfile::TempDir;

    fn touch(path: &Path, time: SystemTime) -> std::io::Result<()> {
        fs::write(path, b"content")?;
        File::options().write(true).open(path)?.set_modified(time)
    }

    #[test]
    fn test_only_files_modified_after_cutoff() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("home");
        fs::create_dir_all(&root)?;

        let cutoff = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        touch(&root.join("before"), cutoff - Duration::from_secs(1))?;
        touch(&root.join("exactly"), cutoff)?;
        touch(&root.join("after"), cutoff + Duration::from_secs(1))?;

        let scope = IncrementalScope::new(Arc::new(DefaultScope::new()?), DateTime::<Utc>::from(cutoff));

        let volume_path = temp_dir.path().join("incremental.zip");
        let mut creator = ZipVolume.create_new(&volume_path)?;
        let mut existing = BTreeSet::new();
        scope.add_files(&root, creator.as_mut(), &mut existing)?;
        creator.close()?;

        // every visited name is recorded
        assert_eq!(existing.len(), 3);

        let extractor = ZipVolume.extract(&volume_path)?;
        let names: Vec<String> = extractor
            .entries()?
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["after"]);

        Ok(())
    }
}
