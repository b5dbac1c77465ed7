//! Existing-file metadata as used during restore.
//!
//! The names recorded by the last backup say which files should exist after a
//! restore. While containers are replayed, every name carries a decision so
//! that an older container cannot bring back a file that was deleted later,
//! and a file kept on disk by an early container is not clobbered by a later
//! one.

use crate::fs::metadata::path_exists;
use std::collections::HashMap;
use std::path::Path;

/// What happens to a name when a container holding it is extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreDecision {
    /// No container holding this name has been extracted yet.
    Undecided,
    /// The name is written from the backup, replacing earlier containers.
    Restore,
    /// The file already existed locally and stays as it is.
    KeepExisting,
}

/// Decision map for one restore.
///
/// The map is authoritative when it was loaded non-empty: names missing
/// from it are never extracted. An empty map accepts every name. This is
/// fixed at load time and does not change as decisions are added.
#[derive(Debug, Clone, Default)]
pub struct ExistingFiles {
    decisions: HashMap<String, RestoreDecision>,
    authoritative: bool,
}

impl ExistingFiles {
    /// A map that accepts every name.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let decisions: HashMap<_, _> = names
            .into_iter()
            .map(|name| (name.into(), RestoreDecision::Undecided))
            .collect();
        let authoritative = !decisions.is_empty();
        Self {
            decisions,
            authoritative,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn decision(&self, name: &str) -> Option<RestoreDecision> {
        self.decisions.get(name).copied()
    }

    /// Decide whether the entry `name` should be written to `target`.
    ///
    /// The first container that sees a name settles it: `Restore` when
    /// overwriting or when nothing is on disk yet, `KeepExisting` otherwise.
    /// Later containers reuse that decision, except that `overwrite` always
    /// restores.
    pub fn should_extract(&mut self, name: &str, target: &Path, overwrite: bool) -> bool {
        let current = match self.decisions.get(name) {
            Some(decision) => *decision,
            None if self.authoritative => return false,
            None => RestoreDecision::Undecided,
        };

        let decision = if overwrite || !path_exists(target) {
            RestoreDecision::Restore
        } else if current == RestoreDecision::Undecided {
            RestoreDecision::KeepExisting
        } else {
            current
        };

        self.decisions.insert(name.to_string(), decision);
        decision == RestoreDecision::Restore
    }

    /// Move every name starting with `prefix` into a new map, with the prefix
    /// stripped. The new map inherits authoritativeness.
    pub fn split_prefix(&mut self, prefix: &str) -> ExistingFiles {
        let names: Vec<String> = self
            .decisions
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();

        let mut decisions = HashMap::with_capacity(names.len());
        for name in names {
            if let Some(decision) = self.decisions.remove(&name) {
                decisions.insert(name[prefix.len()..].to_string(), decision);
            }
        }

        ExistingFiles {
            decisions,
            authoritative: self.authoritative,
        }
    }

    /// Put the names of a map produced by [`split_prefix`](Self::split_prefix)
    /// back under `prefix`.
    pub fn merge_prefix(&mut self, prefix: &str, sub: ExistingFiles) {
        for (name, decision) in sub.decisions {
            self.decisions.insert(format!("{}{}", prefix, name), decision);
        }
    }
}
