use crate::reconcile::file_index::FileIndex;
use crate::storage::StorageError;
use std::collections::HashMap;

/// Published-area indices for one run, keyed by the project system whose
/// published copy they describe. `None` marks a system with no published
/// area so it is not queried again.
#[derive(Debug, Default)]
pub struct PublishedIndexCache {
    entries: HashMap<String, Option<FileIndex>>,
}

impl PublishedIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached index for `system`, running `build` on first use.
    /// A failed build is not cached.
    pub fn get_or_build<E>(
        &mut self,
        system: &str,
        build: impl FnOnce() -> Result<Option<FileIndex>, E>,
    ) -> Result<Option<&FileIndex>, E> {
        if !self.entries.contains_key(system) {
            let built = build()?;
            self.entries.insert(system.to_string(), built);
        }
        Ok(self.entries.get(system).and_then(Option::as_ref))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Whole-system indices of owning project systems, used to rediscover
/// source files. Lives for one run.
#[derive(Debug, Default)]
pub struct OwnerIndexCache {
    entries: HashMap<String, FileIndex>,
}

impl OwnerIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, system: &str, build: impl FnOnce() -> FileIndex) -> &FileIndex {
        self.entries.entry(system.to_string()).or_insert_with(build)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// System → external project id, kept for the whole process. Negative
/// answers are cached too; lookup errors are not.
#[derive(Debug, Default)]
pub struct ExternalIdCache {
    entries: HashMap<String, Option<String>>,
}

impl ExternalIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_lookup(
        &mut self,
        system: &str,
        lookup: impl FnOnce() -> Result<Option<String>, StorageError>,
    ) -> Result<Option<String>, StorageError> {
        if let Some(cached) = self.entries.get(system) {
            return Ok(cached.clone());
        }
        let found = lookup()?;
        self.entries.insert(system.to_string(), found.clone());
        Ok(found)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
