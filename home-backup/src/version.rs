//! The `upgrade-version` marker kept in the home directory.

use crate::storage::manifest::{self, VERSION_COMMENT, VERSION_FILE};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Version recorded in `<root>/upgrade-version`, if any.
///
/// The last entry wins. An unreadable file counts as no version.
pub fn home_version(root: &Path) -> Option<String> {
    match fs::read_to_string(root.join(VERSION_FILE)) {
        Ok(content) => manifest::parse(&content).pop(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            debug!("Could not read home version: {}", e);
            None
        }
    }
}

pub fn write_home_version(root: &Path, version: &str) -> io::Result<()> {
    fs::write(root.join(VERSION_FILE), manifest::render(VERSION_COMMENT, [version]))
}
