use crate::reconcile::config::{EngineConfig, StorageConfig};
use crate::storage::{EntryKind, RemoteEntry, RemoteStorage, StorageError};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const TOKEN_HEADER: &str = "X-Tapis-Token";

#[derive(Debug, Deserialize)]
struct FileInfo {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    #[serde(default)]
    result: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    result: Value,
}

impl From<FileInfo> for RemoteEntry {
    fn from(info: FileInfo) -> Self {
        Self {
            name: info.name,
            path: info.path,
            kind: if info.kind == "dir" {
                EntryKind::Dir
            } else {
                EntryKind::File
            },
            size: info.size,
        }
    }
}

/// Files API client plus the portal's project metadata endpoint.
pub struct HttpStorage {
    client: Client,
    base_url: String,
    portal_url: String,
    token: String,
    page_size: u64,
    max_retries: usize,
    project_system_prefix: String,
}

fn encode_path(path: &str) -> String {
    path.trim_start_matches('/')
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn project_id_from_payload(payload: &Value) -> Option<String> {
    payload
        .get("baseProject")
        .and_then(|v| v.get("value"))
        .and_then(|v| v.get("projectId"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
}

impl HttpStorage {
    pub fn new(
        storage: &StorageConfig,
        engine: &EngineConfig,
        token: &str,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(storage.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: storage.base_url.trim_end_matches('/').to_string(),
            portal_url: storage.portal_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            page_size: storage.page_size,
            max_retries: storage.max_retries,
            project_system_prefix: engine.project_system_prefix.clone(),
        })
    }

    fn with_retry<T>(
        &self,
        label: &str,
        mut op: impl FnMut() -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut attempt = 0usize;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay_ms = 250 * attempt as u64;
                    warn!(%label, attempt, delay_ms, error = %err, "retrying storage request");
                    thread::sleep(Duration::from_millis(delay_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn check_status(response: Response, system: &str, path: &str) -> Result<Response, StorageError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotListable {
                system: system.to_string(),
                path: path.to_string(),
            });
        }
        if !status.is_success() {
            return Err(StorageError::Status {
                system: system.to_string(),
                path: path.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    fn list_page(
        &self,
        system: &str,
        path: &str,
        offset: u64,
    ) -> Result<Vec<RemoteEntry>, StorageError> {
        let url = format!(
            "{}/v3/files/ops/{}/{}",
            self.base_url,
            urlencoding::encode(system),
            encode_path(path)
        );
        let response = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .query(&[("limit", self.page_size), ("offset", offset)])
            .send()?;
        let response = Self::check_status(response, system, path)?;
        let parsed: ListingResponse = response
            .json()
            .map_err(|err| StorageError::Decode(format!("listing {system}:{path}: {err}")))?;
        Ok(parsed.result.into_iter().map(RemoteEntry::from).collect())
    }
}

impl RemoteStorage for HttpStorage {
    fn list(&self, system: &str, path: &str) -> Result<Vec<RemoteEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut offset = 0u64;
        loop {
            let page = self.with_retry("list", || self.list_page(system, path, offset))?;
            let page_len = page.len() as u64;
            entries.extend(page);
            if page_len < self.page_size {
                break;
            }
            offset += page_len;
        }
        debug!(%system, %path, entries = entries.len(), "listed remote directory");
        Ok(entries)
    }

    fn get_file_metadata(&self, system: &str, path: &str) -> Result<RemoteEntry, StorageError> {
        let url = format!(
            "{}/v3/files/utils/linux/{}/{}",
            self.base_url,
            urlencoding::encode(system),
            encode_path(path)
        );
        let stat: StatResponse = self.with_retry("stat", || {
            let response = self
                .client
                .get(&url)
                .header(TOKEN_HEADER, &self.token)
                .send()?;
            let response = Self::check_status(response, system, path)?;
            response
                .json()
                .map_err(|err| StorageError::Decode(format!("stat {system}:{path}: {err}")))
        })?;

        let is_dir = stat
            .result
            .get("dir")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let name = crate::reconcile::util::basename(path)
            .unwrap_or_default()
            .to_string();
        Ok(RemoteEntry {
            name,
            path: path.to_string(),
            kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
            size: stat.result.get("size").and_then(Value::as_u64),
        })
    }

    fn resolve_external_project_id(&self, system: &str) -> Result<Option<String>, StorageError> {
        let Some(uuid) = system
            .strip_prefix(self.project_system_prefix.as_str())
            .filter(|uuid| !uuid.is_empty())
        else {
            return Ok(None);
        };

        let url = format!("{}/api/projects/v2/{}/", self.portal_url, urlencoding::encode(uuid));
        let payload: Value = self.with_retry("project", || {
            let response = self
                .client
                .get(&url)
                .header(TOKEN_HEADER, &self.token)
                .send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(StorageError::Status {
                    system: system.to_string(),
                    path: url.clone(),
                    status: status.as_u16(),
                });
            }
            response
                .json()
                .map_err(|err| StorageError::Decode(format!("project {system}: {err}")))
        })?;

        match project_id_from_payload(&payload) {
            Some(id) => Ok(Some(id)),
            None => Err(StorageError::ProjectLookup {
                system: system.to_string(),
                message: "response has no baseProject.value.projectId".to_string(),
            }),
        }
    }
}
