//! In-memory storage double shared by the engine's unit tests.

use crate::storage::{EntryKind, RemoteEntry, RemoteStorage, StorageError};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct FakeStorage {
    files: BTreeSet<(String, String)>,
    external_ids: BTreeMap<String, String>,
    failing: BTreeSet<(String, String)>,
    pub list_calls: RefCell<Vec<(String, String)>>,
    pub metadata_calls: RefCell<Vec<(String, String)>>,
    pub project_lookups: RefCell<Vec<String>>,
}

fn norm(path: &str) -> String {
    path.trim_matches('/').to_string()
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, system: &str, path: &str) -> Self {
        self.files.insert((system.to_string(), norm(path)));
        self
    }

    pub fn with_external_id(mut self, system: &str, external_id: &str) -> Self {
        self.external_ids
            .insert(system.to_string(), external_id.to_string());
        self
    }

    /// Any call touching exactly this path fails with a server error.
    pub fn failing_on(mut self, system: &str, path: &str) -> Self {
        self.failing.insert((system.to_string(), norm(path)));
        self
    }

    fn check_failure(&self, system: &str, path: &str) -> Result<(), StorageError> {
        if self.failing.contains(&(system.to_string(), norm(path))) {
            return Err(StorageError::Status {
                system: system.to_string(),
                path: path.to_string(),
                status: 500,
            });
        }
        Ok(())
    }

    fn is_file(&self, system: &str, path: &str) -> bool {
        self.files.contains(&(system.to_string(), norm(path)))
    }
}

impl RemoteStorage for FakeStorage {
    fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        self.list_calls
            .borrow_mut()
            .push((system.to_string(), path.to_string()));
        self.check_failure(system, path)?;

        let dir = norm(path);
        if self.is_file(system, &dir) {
            let name = dir.rsplit('/').next().unwrap_or_default().to_string();
            return Ok(vec![RemoteEntry {
                name,
                path: format!("/{dir}"),
                kind: EntryKind::File,
                size: Some(1),
            }]);
        }

        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let mut children: BTreeMap<String, EntryKind> = BTreeMap::new();
        for (sys, file) in &self.files {
            if sys != system {
                continue;
            }
            let Some(rest) = file.strip_prefix(prefix.as_str()) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child_dir, _)) => {
                    children.insert(child_dir.to_string(), EntryKind::Dir);
                }
                None => {
                    children.insert(rest.to_string(), EntryKind::File);
                }
            }
        }

        if children.is_empty() {
            return Err(StorageError::NotListable {
                system: system.to_string(),
                path: path.to_string(),
            });
        }

        Ok(children
            .into_iter()
            .map(|(name, kind)| RemoteEntry {
                path: format!("/{prefix}{name}"),
                name,
                kind,
                size: None,
            })
            .collect())
    }

    fn get_file_metadata(&self, system: &str, path: &str) -> Result<RemoteEntry, StorageError> {
        self.metadata_calls
            .borrow_mut()
            .push((system.to_string(), path.to_string()));
        self.check_failure(system, path)?;
        if !self.is_file(system, path) {
            return Err(StorageError::NotListable {
                system: system.to_string(),
                path: path.to_string(),
            });
        }
        let dir = norm(path);
        Ok(RemoteEntry {
            name: dir.rsplit('/').next().unwrap_or_default().to_string(),
            path: format!("/{dir}"),
            kind: EntryKind::File,
            size: Some(1),
        })
    }

    fn resolve_external_project_id(&self, system: &str) -> Result<Option<String>, StorageError> {
        self.project_lookups.borrow_mut().push(system.to_string());
        Ok(self.external_ids.get(system).cloned())
    }
}

/// Delegates to a [`FakeStorage`], running `on_list` before each listing
/// so a test can look at the store mid-run.
pub struct ObservedStorage<'a, F: Fn(&str, &str)> {
    pub inner: &'a FakeStorage,
    pub on_list: F,
}

impl<F: Fn(&str, &str)> RemoteStorage for ObservedStorage<'_, F> {
    fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        (self.on_list)(system, path);
        self.inner.list(system, path)
    }

    fn get_file_metadata(&self, system: &str, path: &str) -> Result<RemoteEntry, StorageError> {
        self.inner.get_file_metadata(system, path)
    }

    fn resolve_external_project_id(&self, system: &str) -> Result<Option<String>, StorageError> {
        self.inner.resolve_external_project_id(system)
    }
}
