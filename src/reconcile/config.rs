use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

pub const DESIGNSAFE_PUBLISHED_SYSTEM: &str = "designsafe.storage.published";
pub const DESIGNSAFE_COMMUNITY_SYSTEM: &str = "designsafe.storage.community";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Http,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub base_url: String,
    pub portal_url: String,
    pub local_root: Option<String>,
    pub request_timeout_secs: u64,
    pub page_size: u64,
    pub max_retries: usize,
}

fn default_max_retries() -> usize {
    2
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Http,
            base_url: "https://designsafe.tapis.io".to_string(),
            portal_url: "https://www.designsafe-ci.org".to_string(),
            local_root: None,
            request_timeout_secs: 30,
            page_size: 1000,
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub public_systems: Vec<String>,
    pub published_system: String,
    pub published_root_template: String,
    pub project_system_prefix: String,
    pub trash_dir_names: Vec<String>,
    pub item_error_max_chars: usize,
    pub run_error_max_chars: usize,
}

fn default_item_error_max_chars() -> usize {
    100
}

fn default_run_error_max_chars() -> usize {
    200
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            public_systems: vec![
                DESIGNSAFE_PUBLISHED_SYSTEM.to_string(),
                DESIGNSAFE_COMMUNITY_SYSTEM.to_string(),
            ],
            published_system: DESIGNSAFE_PUBLISHED_SYSTEM.to_string(),
            published_root_template: "/published-data/{project_id}/".to_string(),
            project_system_prefix: "project-".to_string(),
            trash_dir_names: vec![".Trash".to_string()],
            item_error_max_chars: default_item_error_max_chars(),
            run_error_max_chars: default_run_error_max_chars(),
        }
    }
}

impl EngineConfig {
    pub fn is_public_system(&self, system: &str) -> bool {
        self.public_systems.iter().any(|s| s == system)
    }

    /// The external project's storage systems follow `<prefix><uuid>`.
    pub fn project_uuid<'a>(&self, system: &'a str) -> Option<&'a str> {
        system
            .strip_prefix(self.project_system_prefix.as_str())
            .filter(|uuid| !uuid.is_empty())
    }

    pub fn published_root(&self, external_project_id: &str) -> String {
        self.published_root_template
            .replace("{project_id}", external_project_id)
    }

    pub fn is_trash_dir(&self, path: &str) -> bool {
        let trimmed = path.trim_end_matches('/');
        self.trash_dir_names
            .iter()
            .any(|name| trimmed.ends_with(name.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReconcileConfig {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialReconcileConfig {
    storage: Option<StorageConfig>,
    engine: Option<EngineConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_optional_string(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn env_or_backend(var: &str, fallback: StorageBackend) -> StorageBackend {
    match env::var(var) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "http" => StorageBackend::Http,
            "local" => StorageBackend::Local,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn validate(cfg: &ReconcileConfig) -> Result<()> {
    if cfg.engine.batch_size == 0 {
        return Err(anyhow!("invalid batch size: must be >= 1"));
    }
    if cfg.engine.public_systems.is_empty() {
        return Err(anyhow!("invalid public systems: at least one is required"));
    }
    if cfg.engine.published_system.trim().is_empty() {
        return Err(anyhow!("invalid published system: cannot be empty"));
    }
    if !cfg.engine.published_root_template.contains("{project_id}") {
        return Err(anyhow!(
            "invalid published root template: must contain `{{project_id}}`"
        ));
    }
    if cfg.engine.project_system_prefix.trim().is_empty() {
        return Err(anyhow!("invalid project system prefix: cannot be empty"));
    }
    if cfg.engine.item_error_max_chars == 0 || cfg.engine.run_error_max_chars == 0 {
        return Err(anyhow!("invalid error truncation: must be >= 1 char"));
    }
    if cfg.storage.request_timeout_secs == 0 {
        return Err(anyhow!("invalid request timeout: must be >= 1 second"));
    }
    if cfg.storage.page_size == 0 {
        return Err(anyhow!("invalid listing page size: must be >= 1"));
    }
    if cfg.storage.backend == StorageBackend::Local && cfg.storage.local_root.is_none() {
        return Err(anyhow!(
            "local storage backend requires `local_root` (or LOCSYNC_LOCAL_ROOT)"
        ));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("LOCSYNC_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    if let Ok(locsync_home) = env::var("LOCSYNC_HOME") {
        let trimmed = locsync_home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed).join("locsync.toml"));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".locsync").join("locsync.toml"))
}

fn merge_file_config(base: &mut ReconcileConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialReconcileConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse locsync config {}: {err}", path.display()))?;
    if let Some(storage) = parsed.storage {
        base.storage = storage;
    }
    if let Some(engine) = parsed.engine {
        base.engine = engine;
    }
    Ok(())
}

pub fn load_config() -> Result<ReconcileConfig> {
    let mut cfg = ReconcileConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.storage.backend = env_or_backend("LOCSYNC_STORAGE_BACKEND", cfg.storage.backend);
    cfg.storage.base_url = env_or_string("LOCSYNC_TAPIS_BASE_URL", &cfg.storage.base_url);
    cfg.storage.portal_url = env_or_string("LOCSYNC_PORTAL_URL", &cfg.storage.portal_url);
    cfg.storage.local_root =
        env_or_optional_string("LOCSYNC_LOCAL_ROOT", cfg.storage.local_root.take());
    cfg.storage.request_timeout_secs = env_or_u64(
        "LOCSYNC_REQUEST_TIMEOUT_SECS",
        cfg.storage.request_timeout_secs,
    );
    cfg.storage.page_size = env_or_u64("LOCSYNC_LISTING_PAGE_SIZE", cfg.storage.page_size);
    cfg.storage.max_retries = env_or_usize("LOCSYNC_MAX_RETRIES", cfg.storage.max_retries);

    cfg.engine.batch_size = env_or_usize("LOCSYNC_BATCH_SIZE", cfg.engine.batch_size);
    cfg.engine.public_systems =
        env_or_csv("LOCSYNC_PUBLIC_SYSTEMS", &cfg.engine.public_systems);
    cfg.engine.published_system =
        env_or_string("LOCSYNC_PUBLISHED_SYSTEM", &cfg.engine.published_system);
    cfg.engine.published_root_template = env_or_string(
        "LOCSYNC_PUBLISHED_ROOT_TEMPLATE",
        &cfg.engine.published_root_template,
    );
    cfg.engine.project_system_prefix = env_or_string(
        "LOCSYNC_PROJECT_SYSTEM_PREFIX",
        &cfg.engine.project_system_prefix,
    );
    cfg.engine.trash_dir_names =
        env_or_csv("LOCSYNC_TRASH_DIR_NAMES", &cfg.engine.trash_dir_names);

    validate(&cfg)?;
    Ok(cfg)
}
