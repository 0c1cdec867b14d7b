use crate::storage::{EntryKind, RemoteEntry, RemoteStorage, StorageError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

const PROJECTS_FILE: &str = "projects.json";

/// Storage mirror on local disk: `<root>/<system>/<path>`, with
/// `<root>/projects.json` mapping project systems to external ids.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn system_root(&self, system: &str) -> PathBuf {
        self.root.join(system)
    }

    fn resolve(&self, system: &str, path: &str) -> Result<PathBuf, StorageError> {
        let mut out = self.system_root(system);
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                // Escaping the system root is treated as a missing path.
                _ => {
                    return Err(StorageError::NotListable {
                        system: system.to_string(),
                        path: path.to_string(),
                    });
                }
            }
        }
        Ok(out)
    }

    fn relative(&self, system: &str, full: &Path) -> String {
        full.strip_prefix(self.system_root(system))
            .unwrap_or(full)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    fn entry_for(&self, system: &str, full: &Path) -> Result<RemoteEntry, StorageError> {
        let meta = fs::metadata(full)?;
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(RemoteEntry {
            name,
            path: self.relative(system, full),
            kind: if meta.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::File
            },
            size: if meta.is_dir() { None } else { Some(meta.len()) },
        })
    }
}

impl RemoteStorage for LocalStorage {
    fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        let full = self.resolve(system, path)?;
        if !full.exists() {
            return Err(StorageError::NotListable {
                system: system.to_string(),
                path: path.to_string(),
            });
        }
        if full.is_file() {
            return Ok(vec![self.entry_for(system, &full)?]);
        }

        let mut children = fs::read_dir(&full)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()?;
        children.sort();

        children
            .iter()
            .map(|child| self.entry_for(system, child))
            .collect()
    }

    fn get_file_metadata(&self, system: &str, path: &str) -> Result<RemoteEntry, StorageError> {
        let full = self.resolve(system, path)?;
        if !full.exists() {
            return Err(StorageError::NotListable {
                system: system.to_string(),
                path: path.to_string(),
            });
        }
        self.entry_for(system, &full)
    }

    fn resolve_external_project_id(&self, system: &str) -> Result<Option<String>, StorageError> {
        let file = self.root.join(PROJECTS_FILE);
        if !file.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&file)?;
        let map: BTreeMap<String, String> = serde_json::from_str(&raw)
            .map_err(|err| StorageError::Decode(format!("{}: {err}", file.display())))?;
        Ok(map.get(system).cloned())
    }
}
