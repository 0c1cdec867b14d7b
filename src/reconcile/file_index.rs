use crate::reconcile::config::EngineConfig;
use crate::reconcile::util::basename;
use crate::storage::{RemoteEntry, RemoteStorage, StorageError};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub directories: usize,
    pub files: usize,
    pub skipped_subtrees: usize,
    pub skipped_trash: usize,
}

/// Reverse index of one storage system: filename → every path holding a file
/// with that name, in listing order. Paths are relative to the system root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileIndex {
    system: String,
    entries: BTreeMap<String, Vec<String>>,
    stats: IndexStats,
}

impl FileIndex {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            ..Self::default()
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    pub fn insert(&mut self, filename: &str, path: &str) {
        self.entries
            .entry(filename.to_string())
            .or_default()
            .push(path.trim_start_matches('/').to_string());
    }

    /// Append every path of `other`; duplicate filenames accumulate.
    pub fn merge(&mut self, other: FileIndex) {
        for (filename, paths) in other.entries {
            self.entries.entry(filename).or_default().extend(paths);
        }
        self.stats.directories += other.stats.directories;
        self.stats.files += other.stats.files;
        self.stats.skipped_subtrees += other.stats.skipped_subtrees;
        self.stats.skipped_trash += other.stats.skipped_trash;
    }

    pub fn get(&self, filename: &str) -> Option<&[String]> {
        self.entries.get(filename).map(Vec::as_slice)
    }

    /// Number of distinct filenames.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, paths)| (name.as_str(), paths.as_slice()))
    }
}

fn index_listing(
    client: &dyn RemoteStorage,
    engine: &EngineConfig,
    system: &str,
    listing: Vec<RemoteEntry>,
) -> FileIndex {
    let mut index = FileIndex::new(system);
    index.stats.directories += 1;

    for entry in listing {
        if !entry.is_dir() {
            let filename = basename(&entry.path)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| entry.name.clone());
            index.insert(&filename, &entry.path);
            index.stats.files += 1;
            continue;
        }

        if engine.is_trash_dir(&entry.path) {
            debug!(%system, path = %entry.path, "skipping trash directory");
            index.stats.skipped_trash += 1;
            continue;
        }

        match client.list(system, &entry.path) {
            Ok(children) => index.merge(index_listing(client, engine, system, children)),
            Err(err) => {
                warn!(%system, path = %entry.path, error = %err, "skipping unlistable subtree");
                index.stats.skipped_subtrees += 1;
            }
        }
    }

    index
}

/// Recursively index `root_path` on `system`.
///
/// An unlistable root yields an empty index: a project that has not been
/// published yet simply has nothing at its published root. A failing
/// subtree below the root is skipped so its siblings are still indexed.
pub fn build_index(
    client: &dyn RemoteStorage,
    engine: &EngineConfig,
    system: &str,
    root_path: &str,
) -> FileIndex {
    let listing = match client.list(system, root_path) {
        Ok(listing) => listing,
        Err(StorageError::NotListable { .. }) => {
            info!(%system, path = %root_path, "index root not listable; treating as empty");
            return FileIndex::new(system);
        }
        Err(err) => {
            warn!(%system, path = %root_path, error = %err, "unable to list index root");
            return FileIndex::new(system);
        }
    };

    let index = index_listing(client, engine, system, listing);
    info!(
        %system,
        path = %root_path,
        unique_filenames = index.len(),
        files = index.stats.files,
        "built file index"
    );
    index
}
