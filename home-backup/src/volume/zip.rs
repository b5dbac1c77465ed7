//! ZIP implementation of [`Volume`].
//!
//! Symlinks are stored as entries with the unix link type bits set and the
//! link target as content. Directories are stored as empty entries ending in
//! `/`. Regular files keep their unix permission bits.

use super::{Volume, VolumeCreator, VolumeEntry, VolumeExtractor};
use crate::fs::metadata::{apply_permissions, path_exists, remove_existing};
use crate::fs::EntryKind;
use crate::utils::{BackupError, Result};
use ::zip::write::FileOptions;
use ::zip::{CompressionMethod, ZipArchive, ZipWriter};
use std::cell::RefCell;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// ZIP container format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipVolume;

impl Volume for ZipVolume {
    fn file_extension(&self) -> &str {
        "zip"
    }

    fn create_new(&self, path: &Path) -> Result<Box<dyn VolumeCreator>> {
        Ok(Box::new(ZipCreator::create(path)?))
    }

    fn extract(&self, path: &Path) -> Result<Box<dyn VolumeExtractor>> {
        Ok(Box::new(ZipExtractor::open(path)?))
    }
}

pub struct ZipCreator {
    path: PathBuf,
    writer: Option<ZipWriter<File>>,
    file_count: usize,
}

impl ZipCreator {
    pub fn create(path: &Path) -> Result<Self> {
        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(BackupError::VolumeExists(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Creating zip volume: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(ZipWriter::new(file)),
            file_count: 0,
        })
    }
}

impl VolumeCreator for ZipCreator {
    fn add_file(&mut self, file: &Path, name: &str, attrs: Option<&Metadata>) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| BackupError::VolumeClosed(self.path.clone()))?;

        let resolved;
        let attrs = match attrs {
            Some(attrs) => attrs,
            None => {
                resolved = fs::symlink_metadata(file)?;
                &resolved
            }
        };

        let options = entry_options(attrs);
        let file_type = attrs.file_type();

        if file_type.is_symlink() {
            let target = fs::read_link(file)?;
            trace!("Adding symlink {} -> {}", name, target.display());
            writer.add_symlink(name, target.to_string_lossy(), options)?;
        } else if file_type.is_dir() {
            trace!("Adding directory {}", name);
            writer.add_directory(name, options)?;
        } else {
            trace!("Adding file {}", name);
            let mut source = File::open(file)?;
            writer.start_file(name, options.large_file(attrs.len() >= u64::from(u32::MAX)))?;
            io::copy(&mut source, writer)?;
        }

        self.file_count += 1;
        Ok(())
    }

    fn file_count(&self) -> usize {
        self.file_count
    }

    fn close(&mut self) -> Result<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| BackupError::VolumeClosed(self.path.clone()))?;
        writer.finish()?;
        debug!("Closed zip volume {} with {} entries", self.path.display(), self.file_count);
        Ok(())
    }
}

fn entry_options(attrs: &Metadata) -> FileOptions {
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    match unix_mode(attrs) {
        Some(mode) => options.unix_permissions(mode),
        None => options,
    }
}

#[cfg(unix)]
fn unix_mode(attrs: &Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(attrs.permissions().mode())
}

#[cfg(not(unix))]
fn unix_mode(_attrs: &Metadata) -> Option<u32> {
    None
}

pub struct ZipExtractor {
    path: PathBuf,
    archive: Option<RefCell<ZipArchive<File>>>,
}

impl ZipExtractor {
    pub fn open(path: &Path) -> Result<Self> {
        let archive = ZipArchive::new(File::open(path)?)?;
        debug!("Opened zip volume {} with {} entries", path.display(), archive.len());

        Ok(Self {
            path: path.to_path_buf(),
            archive: Some(RefCell::new(archive)),
        })
    }
}

impl VolumeExtractor for ZipExtractor {
    fn entries(&self) -> Result<Vec<Box<dyn VolumeEntry + '_>>> {
        let archive = self
            .archive
            .as_ref()
            .ok_or_else(|| BackupError::VolumeClosed(self.path.clone()))?;

        let mut zip = archive.borrow_mut();
        let mut entries: Vec<Box<dyn VolumeEntry + '_>> = Vec::with_capacity(zip.len());

        for index in 0..zip.len() {
            let file = zip.by_index_raw(index)?;
            let mode = file.unix_mode();
            let kind = if file.is_dir() {
                EntryKind::Directory
            } else if mode.map(|m| m & S_IFMT == S_IFLNK).unwrap_or(false) {
                EntryKind::Symlink
            } else {
                EntryKind::File
            };

            entries.push(Box::new(ZipEntry {
                archive,
                index,
                name: file.name().trim_end_matches('/').to_string(),
                kind,
                mode,
            }));
        }

        Ok(entries)
    }

    fn close(&mut self) -> Result<()> {
        self.archive
            .take()
            .map(|_| ())
            .ok_or_else(|| BackupError::VolumeClosed(self.path.clone()))
    }
}

struct ZipEntry<'a> {
    archive: &'a RefCell<ZipArchive<File>>,
    index: usize,
    name: String,
    kind: EntryKind,
    mode: Option<u32>,
}

impl ZipEntry<'_> {
    fn read_link_target(&self) -> Result<String> {
        let mut zip = self.archive.borrow_mut();
        let mut entry = zip.by_index(self.index)?;
        let mut target = String::new();
        entry.read_to_string(&mut target)?;
        Ok(target)
    }

    fn write_file(&self, target: &Path) -> Result<()> {
        let mut zip = self.archive.borrow_mut();
        let mut entry = zip.by_index(self.index)?;
        let mut out = File::create(target)?;
        io::copy(&mut entry, &mut out)?;

        if let Some(mode) = self.mode {
            apply_permissions(target, mode)?;
        }
        Ok(())
    }
}

impl VolumeEntry for ZipEntry<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EntryKind {
        self.kind
    }

    fn extract_to(&self, target: &Path, overwrite: bool) -> Result<()> {
        if !overwrite && path_exists(target) {
            trace!("Keeping existing {}", target.display());
            return Ok(());
        }

        if self.kind == EntryKind::Directory {
            fs::create_dir_all(target)?;
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        remove_existing(target)?;

        match self.kind {
            EntryKind::Symlink => {
                let link = self.read_link_target()?;
                create_symlink(&link, target)?;
            }
            _ => self.write_file(target)?,
        }

        trace!("Extracted {} to {}", self.name, target.display());
        Ok(())
    }
}

#[cfg(unix)]
fn create_symlink(link: &str, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn create_symlink(_link: &str, target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("symlinks are not supported here: {}", target.display()),
    ))
}
