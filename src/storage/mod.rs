//! Remote hierarchical file storage, treated as an external collaborator.
//!
//! The reconciliation engine only needs three calls: list a directory, stat
//! a file, and map a project storage system to its external project id. The
//! [`RemoteStorage`] trait captures exactly that so the engine can run
//! against the HTTP files API in production and against a directory mirror
//! offline.

pub mod http;
pub mod local;

use crate::reconcile::config::{ReconcileConfig, StorageBackend};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    /// Path relative to the system root. May or may not carry a leading `/`
    /// depending on the backend.
    pub path: String,
    pub kind: EntryKind,
    #[serde(default)]
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// The path does not exist (yet). Expected for unpublished projects.
    #[error("{system}:{path} is not listable")]
    NotListable { system: String, path: String },
    #[error("{system}:{path} request failed with status {status}")]
    Status {
        system: String,
        path: String,
        status: u16,
    },
    #[error("project lookup for {system} failed: {message}")]
    ProjectLookup { system: String, message: String },
    #[error("storage transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected storage response: {0}")]
    Decode(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Worth another attempt: server-side and transport failures.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500,
            Self::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            _ => false,
        }
    }
}

pub trait RemoteStorage {
    /// List the entries directly under `path` on `system`. Listing a file
    /// path yields that single file.
    fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteEntry>, StorageError>;

    fn get_file_metadata(&self, system: &str, path: &str) -> Result<RemoteEntry, StorageError>;

    /// External project id (e.g. `PRJ-1234`) for a project storage system,
    /// `None` when the system is not linked to a project.
    fn resolve_external_project_id(&self, system: &str) -> Result<Option<String>, StorageError>;
}

impl<T: RemoteStorage + ?Sized> RemoteStorage for &T {
    fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        (**self).list(system, path)
    }

    fn get_file_metadata(&self, system: &str, path: &str) -> Result<RemoteEntry, StorageError> {
        (**self).get_file_metadata(system, path)
    }

    fn resolve_external_project_id(&self, system: &str) -> Result<Option<String>, StorageError> {
        (**self).resolve_external_project_id(system)
    }
}

impl<T: RemoteStorage + ?Sized> RemoteStorage for Box<T> {
    fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        (**self).list(system, path)
    }

    fn get_file_metadata(&self, system: &str, path: &str) -> Result<RemoteEntry, StorageError> {
        (**self).get_file_metadata(system, path)
    }

    fn resolve_external_project_id(&self, system: &str) -> Result<Option<String>, StorageError> {
        (**self).resolve_external_project_id(system)
    }
}

/// Build the configured backend, authenticating as the requesting user.
pub fn connect(cfg: &ReconcileConfig, token: &str) -> Result<Box<dyn RemoteStorage>> {
    match cfg.storage.backend {
        StorageBackend::Http => {
            let client = http::HttpStorage::new(&cfg.storage, &cfg.engine, token)
                .context("failed to build http storage client")?;
            Ok(Box::new(client))
        }
        StorageBackend::Local => {
            let root = cfg
                .storage
                .local_root
                .as_deref()
                .context("local storage backend requires a root directory")?;
            Ok(Box::new(local::LocalStorage::new(root)))
        }
    }
}
