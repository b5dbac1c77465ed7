//! File system helpers: metadata and tree walking.

pub mod metadata;
pub mod walker;

pub use metadata::EntryKind;
pub use walker::{walk_tree_with_callback, Exclusion, FileInfo, WalkOptions};
