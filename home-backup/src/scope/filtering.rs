use super::{ExistingFiles, Scope};
use crate::utils::Result;
use crate::volume::{ForwardingCreator, VolumeCreator, VolumeExtractor};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Keeps specific entry names out of the container.
///
/// Suppressed names are still recorded as existing, so a restore leaves the
/// local copy alone instead of deleting it.
pub struct FilteringScope {
    inner: Arc<dyn Scope>,
    exclusions: HashSet<String>,
}

impl FilteringScope {
    pub fn new(inner: Arc<dyn Scope>) -> Self {
        Self {
            inner,
            exclusions: HashSet::new(),
        }
    }

    pub fn with_exclusion(mut self, name: impl Into<String>) -> Self {
        self.exclusions.insert(name.into());
        self
    }
}

impl Scope for FilteringScope {
    fn add_files(
        &self,
        root: &Path,
        creator: &mut dyn VolumeCreator,
        existing: &mut BTreeSet<String>,
    ) -> Result<()> {
        let mut filtered = ForwardingCreator::new(creator, |name, _| {
            if self.exclusions.contains(name) {
                trace!("Filtering out {}", name);
                None
            } else {
                Some(name.to_string())
            }
        });
        self.inner.add_files(root, &mut filtered, existing)
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
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_filtered_name_is_recorded_but_not_stored() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().join("home");
        fs::create_dir_all(&root)?;
        fs::write(root.join("backup-worker.log"), b"log line")?;
        fs::write(root.join("config.xml"), b"<hudson/>")?;

        let scope = FilteringScope::new(Arc::new(DefaultScope::new()?))
            .with_exclusion("backup-worker.log");

        let volume_path = temp_dir.path().join("filtered.zip");
        let mut creator = ZipVolume.create_new(&volume_path)?;
        let mut existing = BTreeSet::new();
        scope.add_files(&root, creator.as_mut(), &mut existing)?;
        assert_eq!(creator.file_count(), 1);
        creator.close()?;

        assert!(existing.contains("backup-worker.log"));
        assert!(existing.contains("config.xml"));

        let extractor = ZipVolume.extract(&volume_path)?;
        let names: Vec<String> = extractor
            .entries()?
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(names, vec!["config.xml"]);

        Ok(())
    }
}
