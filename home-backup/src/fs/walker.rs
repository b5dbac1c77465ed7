//! Directory traversal for backup scopes.
//!
//! Walks a tree without following symlinks and reports every regular file,
//! every symlink and every empty directory. Non-empty directories are not
//! reported, their contents carry them through a volume round-trip.

use crate::utils::Result;
use glob::{MatchOptions, Pattern};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

const PATTERN_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A path excluded from a walk, relative to the walk root.
///
/// Exclusions are plain paths. An exclusion containing `*` is a glob in which
/// `*` never crosses a `/`, e.g. `jobs/*/branches/*/workspace`.
#[derive(Debug, Clone)]
pub enum Exclusion {
    Path(PathBuf),
    Pattern(Pattern),
}

impl Exclusion {
    pub fn parse(exclusion: &str) -> Result<Self> {
        let trimmed = exclusion.trim_matches('/');
        if trimmed.contains('*') {
            Ok(Exclusion::Pattern(Pattern::new(trimmed)?))
        } else {
            Ok(Exclusion::Path(PathBuf::from(trimmed)))
        }
    }

    fn matches(&self, relative_path: &Path, name: &str) -> bool {
        match self {
            Exclusion::Path(path) => relative_path == path,
            Exclusion::Pattern(pattern) => pattern.matches_with(name, PATTERN_OPTIONS),
        }
    }
}

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    pub exclusions: Vec<Exclusion>,
}

impl WalkOptions {
    pub fn with_exclusions<I, S>(exclusions: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let exclusions = exclusions
            .into_iter()
            .map(|e| Exclusion::parse(e.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { exclusions })
    }

    fn is_excluded(&self, relative_path: &Path) -> bool {
        let name = volume_name(relative_path);
        self.exclusions.iter().any(|e| e.matches(relative_path, &name))
    }
}

/// A file, symlink or empty directory discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Relative path joined with `/`, as used inside a volume
    pub name: String,

    /// Metadata of the entry itself (symlinks are not followed)
    pub metadata: fs::Metadata,
}

/// Convert a relative path to a `/`-separated volume name.
pub fn volume_name(relative_path: &Path) -> String {
    relative_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a directory tree with a callback for each reported entry.
///
/// Entries that disappear while the walk is running are skipped with a
/// warning, every other error aborts the walk.
pub fn walk_tree_with_callback<F>(root: &Path, options: &WalkOptions, mut callback: F) -> Result<()>
where
    F: FnMut(&FileInfo) -> Result<()>,
{
    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded_entry(entry, root, options));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if is_vanished(e.io_error()) => {
                warn!("Skipping entry that vanished during walk: {}", e);
                continue;
            }
            Err(e) => return Err(io::Error::from(e).into()),
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if is_vanished(e.io_error()) => {
                warn!("Skipping entry that vanished during walk: {}", entry.path().display());
                continue;
            }
            Err(e) => return Err(io::Error::from(e).into()),
        };

        if entry.file_type().is_dir() && !is_empty_dir(entry.path())? {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();

        callback(&FileInfo {
            path: entry.path().to_path_buf(),
            name: volume_name(&relative_path),
            relative_path,
            metadata,
        })?;
    }

    Ok(())
}

fn is_excluded_entry(entry: &DirEntry, root: &Path, options: &WalkOptions) -> bool {
    let Ok(relative_path) = entry.path().strip_prefix(root) else {
        return false;
    };
    let excluded = options.is_excluded(relative_path);
    if excluded {
        debug!("Skipping excluded path: {}", entry.path().display());
    }
    excluded
}

fn is_empty_dir(path: &Path) -> io::Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        // vanished directories are neither empty nor worth reporting
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_vanished(err: Option<&io::Error>) -> bool {
    err.map(|e| e.kind() == io::ErrorKind::NotFound).unwrap_or(false)
}
