//! Archive container abstraction.
//!
//! A [`Volume`] is a container format. Backups append entries through a
//! [`VolumeCreator`], restores read them back through a [`VolumeExtractor`].
//! Entry names are relative, `/`-separated paths.

pub mod forwarding;
pub mod zip;

use crate::fs::EntryKind;
use crate::utils::Result;
use std::fs::Metadata;
use std::path::Path;

pub use forwarding::{ForwardingCreator, ForwardingExtractor, RenamedEntry};
pub use self::zip::ZipVolume;

/// An archive container format.
pub trait Volume: Send + Sync {
    /// Extension used for container file names, without the dot.
    fn file_extension(&self) -> &str;

    /// Create a new container at `path`. Fails with
    /// [`BackupError::VolumeExists`](crate::BackupError::VolumeExists) if the
    /// path already exists.
    fn create_new(&self, path: &Path) -> Result<Box<dyn VolumeCreator>>;

    /// Open an existing container for reading.
    fn extract(&self, path: &Path) -> Result<Box<dyn VolumeExtractor>>;
}

/// Appends entries to a container being written.
pub trait VolumeCreator {
    /// Add a file, directory or symlink under `name`.
    ///
    /// When `attrs` is `None` the metadata is read from `file` without
    /// following symlinks.
    fn add_file(&mut self, file: &Path, name: &str, attrs: Option<&Metadata>) -> Result<()>;

    /// Number of entries added so far.
    fn file_count(&self) -> usize;

    /// Finish the container. Any later call fails with `VolumeClosed`.
    fn close(&mut self) -> Result<()>;
}

/// Reads the entries of an existing container.
pub trait VolumeExtractor {
    /// All entries of the container, in stored order. Each call starts over.
    fn entries(&self) -> Result<Vec<Box<dyn VolumeEntry + '_>>>;

    fn close(&mut self) -> Result<()>;
}

/// A single entry inside a container.
pub trait VolumeEntry {
    fn name(&self) -> &str;

    fn kind(&self) -> EntryKind;

    fn is_directory(&self) -> bool {
        self.kind() == EntryKind::Directory
    }

    fn is_symlink(&self) -> bool {
        self.kind() == EntryKind::Symlink
    }

    /// Write this entry to `target`.
    ///
    /// With `overwrite` unset an existing target (a dangling symlink counts)
    /// is left untouched.
    fn extract_to(&self, target: &Path, overwrite: bool) -> Result<()>;
}
