use crate::error::ReconcileError;
use crate::reconcile::model::{
    FeatureAsset, PointCloud, Project, ReconciliationRun, Task, TileServer, User,
};
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const SCHEMA_VERSION: u32 = 1;

/// Every table the engine reads or writes, persisted as one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Database {
    pub schema_version: u32,
    pub projects: BTreeMap<i64, Project>,
    pub users: BTreeMap<i64, User>,
    pub assets: BTreeMap<i64, FeatureAsset>,
    pub tile_servers: BTreeMap<i64, TileServer>,
    pub point_clouds: BTreeMap<i64, PointCloud>,
    pub runs: BTreeMap<i64, ReconciliationRun>,
    pub tasks: BTreeMap<i64, Task>,
    /// Last id handed out per table.
    pub sequences: BTreeMap<String, i64>,
}

impl Default for Database {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            projects: BTreeMap::new(),
            users: BTreeMap::new(),
            assets: BTreeMap::new(),
            tile_servers: BTreeMap::new(),
            point_clouds: BTreeMap::new(),
            runs: BTreeMap::new(),
            tasks: BTreeMap::new(),
            sequences: BTreeMap::new(),
        }
    }
}

fn allocate<V>(sequences: &mut BTreeMap<String, i64>, table: &str, rows: &BTreeMap<i64, V>) -> i64 {
    let floor = rows.keys().next_back().copied().unwrap_or(0);
    let last = sequences.entry(table.to_string()).or_insert(0);
    *last = (*last).max(floor) + 1;
    *last
}

impl Database {
    pub fn run_for_project(&self, project_id: i64) -> Option<&ReconciliationRun> {
        self.runs.values().find(|run| run.project_id == project_id)
    }

    pub fn run_for_project_mut(&mut self, project_id: i64) -> Option<&mut ReconciliationRun> {
        self.runs
            .values_mut()
            .find(|run| run.project_id == project_id)
    }

    pub fn insert_task(&mut self, mut task: Task) -> i64 {
        let id = allocate(&mut self.sequences, "tasks", &self.tasks);
        task.id = id;
        self.tasks.insert(id, task);
        id
    }

    pub fn insert_run(&mut self, mut run: ReconciliationRun) -> i64 {
        let id = allocate(&mut self.sequences, "runs", &self.runs);
        run.id = id;
        self.runs.insert(id, run);
        id
    }

    pub fn project_assets(&self, project_id: i64) -> impl Iterator<Item = &FeatureAsset> {
        self.assets
            .values()
            .filter(move |asset| asset.project_id == project_id)
    }

    pub fn project_tile_servers(&self, project_id: i64) -> impl Iterator<Item = &TileServer> {
        self.tile_servers
            .values()
            .filter(move |server| server.project_id == project_id)
    }
}

/// Releases the advisory lock when dropped.
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn open(path: &Path) -> Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))
    }

    fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        file.lock_exclusive()
            .with_context(|| format!("failed to lock {}", path.display()))?;
        Ok(Self { file })
    }

    fn shared(path: &Path) -> Result<Self> {
        let file = Self::open(path)?;
        FileExt::lock_shared(&file)
            .with_context(|| format!("failed to lock {}", path.display()))?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// File-backed record store shared by every `locsync` process on a host.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    lock_path: PathBuf,
}

impl Store {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "store.json".into());
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self { path, lock_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Database> {
        if !self.path.exists() {
            return Ok(Database::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Database::default());
        }
        let db: Database = serde_json::from_str(&raw).map_err(|err| {
            ReconcileError::StoreCorrupt(format!("{}: {err}", self.path.display()))
        })?;
        Ok(db)
    }

    fn save(&self, db: &Database) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        let data = serde_json::to_string_pretty(db)?;
        tmp.write_all(format!("{data}\n").as_bytes())?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Consistent read of the whole document.
    pub fn snapshot(&self) -> Result<Database> {
        let _lock = StoreLock::shared(&self.lock_path)?;
        self.load()
    }

    /// Load, mutate and write back under an exclusive lock. Nothing is
    /// written when `apply` fails.
    pub fn transaction<T>(&self, apply: impl FnOnce(&mut Database) -> Result<T>) -> Result<T> {
        let _lock = StoreLock::exclusive(&self.lock_path)?;
        let mut db = self.load()?;
        let out = apply(&mut db)?;
        self.save(&db)?;
        Ok(out)
    }
}
