//! Decorators that sit between a scope and the real container.
//!
//! Composed scopes use them to rename or drop entries on the way in and out
//! without the wrapped scope knowing about it.

use super::{VolumeCreator, VolumeEntry, VolumeExtractor};
use crate::fs::EntryKind;
use crate::utils::Result;
use std::fs::{self, Metadata};
use std::path::Path;

/// Forwards `add_file` calls to a borrowed creator.
///
/// `map` receives the entry name and its metadata and returns the name to
/// store it under, or `None` to drop the entry.
pub struct ForwardingCreator<'a, F> {
    inner: &'a mut dyn VolumeCreator,
    map: F,
}

impl<'a, F> ForwardingCreator<'a, F>
where
    F: FnMut(&str, &Metadata) -> Option<String>,
{
    pub fn new(inner: &'a mut dyn VolumeCreator, map: F) -> Self {
        Self { inner, map }
    }
}

impl<F> VolumeCreator for ForwardingCreator<'_, F>
where
    F: FnMut(&str, &Metadata) -> Option<String>,
{
    fn add_file(&mut self, file: &Path, name: &str, attrs: Option<&Metadata>) -> Result<()> {
        let resolved;
        let attrs = match attrs {
            Some(attrs) => attrs,
            None => {
                resolved = fs::symlink_metadata(file)?;
                &resolved
            }
        };

        match (self.map)(name, attrs) {
            Some(mapped) => self.inner.add_file(file, &mapped, Some(attrs)),
            None => Ok(()),
        }
    }

    fn file_count(&self) -> usize {
        self.inner.file_count()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Presents a renamed and filtered view of a borrowed extractor.
///
/// `map` returns the name an entry should be seen under, or `None` to hide
/// it. Closing the view leaves the wrapped extractor open.
pub struct ForwardingExtractor<'a, F> {
    inner: &'a dyn VolumeExtractor,
    map: F,
}

impl<'a, F> ForwardingExtractor<'a, F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(inner: &'a dyn VolumeExtractor, map: F) -> Self {
        Self { inner, map }
    }
}

impl<F> VolumeExtractor for ForwardingExtractor<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn entries(&self) -> Result<Vec<Box<dyn VolumeEntry + '_>>> {
        let entries = self
            .inner
            .entries()?
            .into_iter()
            .filter_map(|entry| {
                (self.map)(entry.name()).map(|name| {
                    Box::new(RenamedEntry::new(entry, name)) as Box<dyn VolumeEntry + '_>
                })
            })
            .collect();
        Ok(entries)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// An entry reported under a different name.
pub struct RenamedEntry<'a> {
    inner: Box<dyn VolumeEntry + 'a>,
    name: String,
}

impl<'a> RenamedEntry<'a> {
    pub fn new(inner: Box<dyn VolumeEntry + 'a>, name: String) -> Self {
        Self { inner, name }
    }
}

impl VolumeEntry for RenamedEntry<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> EntryKind {
        self.inner.kind()
    }

    fn extract_to(&self, target: &Path, overwrite: bool) -> Result<()> {
        self.inner.extract_to(target, overwrite)
    }
}
