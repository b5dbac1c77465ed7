//! File selection.
//!
//! A [`Scope`] decides which files under the home root go into a container
//! and where inside the container they live. Backups call
//! [`Scope::add_files`], restores call [`Scope::extract_files`] with the
//! inverse mapping.

pub mod existing;
pub mod filtering;
pub mod incremental;
pub mod multi;
pub mod tree;

use crate::fs::metadata::path_exists;
use crate::fs::{walk_tree_with_callback, WalkOptions};
use crate::utils::Result;
use crate::volume::{VolumeCreator, VolumeExtractor};
use std::collections::BTreeSet;
use std::path::{Component, Path};
use tracing::{debug, trace, warn};

pub use existing::{ExistingFiles, RestoreDecision};
pub use filtering::FilteringScope;
pub use incremental::IncrementalScope;
pub use multi::MultiScope;
pub use tree::{CustomScope, DefaultScope, DEFAULT_EXCLUSIONS};

pub trait Scope: Send + Sync {
    /// Add the files of this scope under `root` to `creator`.
    ///
    /// Every visited name is recorded in `existing`, including names that a
    /// decorating creator decides not to store.
    fn add_files(
        &self,
        root: &Path,
        creator: &mut dyn VolumeCreator,
        existing: &mut BTreeSet<String>,
    ) -> Result<()>;

    /// Extract the entries of this scope from `extractor` below `root`.
    fn extract_files(
        &self,
        root: &Path,
        extractor: &dyn VolumeExtractor,
        overwrite: bool,
        existing: &mut ExistingFiles,
    ) -> Result<()>;
}

/// Add every file, symlink and empty directory below `base` to `creator`,
/// naming entries relative to `base`.
pub fn add_all_files_in(
    base: &Path,
    creator: &mut dyn VolumeCreator,
    existing: &mut BTreeSet<String>,
    options: &WalkOptions,
) -> Result<()> {
    if !path_exists(base) {
        warn!("Backup scope directory does not exist, skipping: {}", base.display());
        return Ok(());
    }

    walk_tree_with_callback(base, options, |file| {
        trace!("Adding {}", file.name);
        existing.insert(file.name.clone());
        creator.add_file(&file.path, &file.name, Some(&file.metadata))
    })
}

/// Extract every entry of `extractor` below `target_dir`, gated by
/// `existing`.
///
/// Entries with absolute names or `..` components are skipped so nothing is
/// ever written outside `target_dir`.
pub fn extract_all_files_to(
    target_dir: &Path,
    extractor: &dyn VolumeExtractor,
    overwrite: bool,
    existing: &mut ExistingFiles,
) -> Result<()> {
    let mut extracted = 0usize;
    let mut skipped = 0usize;

    for entry in extractor.entries()? {
        let name = entry.name();
        if !is_contained(name) {
            warn!("Refusing to extract entry outside of {}: {}", target_dir.display(), name);
            continue;
        }

        let target = target_dir.join(name);
        if existing.should_extract(name, &target, overwrite) {
            entry.extract_to(&target, true)?;
            extracted += 1;
        } else {
            trace!("Not restoring {}", name);
            skipped += 1;
        }
    }

    debug!(
        extracted,
        skipped,
        "Extracted entries to {}",
        target_dir.display()
    );
    Ok(())
}

fn is_contained(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
