//! File metadata handling for backup operations.
//!
//! Entry kinds as stored in a volume, and the small helpers used when
//! restoring entries into place.

use std::fs;
use std::io;
use std::path::Path;

/// Kind of a file system entry as stored in a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// Returns true if something exists at `path`, including dangling symlinks.
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Apply unix permission bits to a regular file or directory.
#[cfg(unix)]
pub fn apply_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
}

#[cfg(not(unix))]
pub fn apply_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    // On non-Unix platforms, metadata application is limited
    Ok(())
}

/// Remove whatever currently occupies `path` so a new file or symlink can be
/// created there. Directories are only removed when empty.
pub fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
