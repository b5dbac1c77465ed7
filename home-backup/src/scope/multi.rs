use super::{ExistingFiles, Scope};
use crate::utils::Result;
use crate::volume::{ForwardingCreator, ForwardingExtractor, VolumeCreator, VolumeExtractor};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

struct SubScope {
    prefix: String,
    scope: Arc<dyn Scope>,
}

/// Combines named scopes in one container, each under its own `<name>/`
/// prefix.
///
/// On restore every sub-scope only sees its own entries and its own part of
/// the decision map, both with the prefix removed.
#[derive(Default)]
pub struct MultiScope {
    sub_scopes: Vec<SubScope>,
}

impl MultiScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sub_scope(&mut self, name: &str, scope: Arc<dyn Scope>) {
        self.sub_scopes.push(SubScope {
            prefix: format!("{}/", name.trim_end_matches('/')),
            scope,
        });
    }

    pub fn with_sub_scope(mut self, name: &str, scope: Arc<dyn Scope>) -> Self {
        self.add_sub_scope(name, scope);
        self
    }

    pub fn len(&self) -> usize {
        self.sub_scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_scopes.is_empty()
    }
}

impl Scope for MultiScope {
    fn add_files(
        &self,
        root: &Path,
        creator: &mut dyn VolumeCreator,
        existing: &mut BTreeSet<String>,
    ) -> Result<()> {
        for sub in &self.sub_scopes {
            let prefix = sub.prefix.as_str();
            let mut names = BTreeSet::new();
            let mut prefixed =
                ForwardingCreator::new(&mut *creator, |name, _| Some(format!("{}{}", prefix, name)));
            sub.scope.add_files(root, &mut prefixed, &mut names)?;

            debug!("Scope {} visited {} entries", prefix, names.len());
            existing.extend(names.into_iter().map(|name| format!("{}{}", prefix, name)));
        }
        Ok(())
    }

    fn extract_files(
        &self,
        root: &Path,
        extractor: &dyn VolumeExtractor,
        overwrite: bool,
        existing: &mut ExistingFiles,
    ) -> Result<()> {
        for sub in &self.sub_scopes {
            let prefix = sub.prefix.as_str();
            let view = ForwardingExtractor::new(extractor, |name: &str| {
                name.strip_prefix(prefix)
                    .filter(|stripped| !stripped.is_empty())
                    .map(str::to_string)
            });

            let mut sub_existing = existing.split_prefix(prefix);
            let result = sub.scope.extract_files(root, &view, overwrite, &mut sub_existing);
            existing.merge_prefix(prefix, sub_existing);
            result?;
        }
        Ok(())
    }
}
