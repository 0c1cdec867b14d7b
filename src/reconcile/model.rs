use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Location bookkeeping shared by every record whose file is tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLocation {
    pub original_system: Option<String>,
    pub original_path: Option<String>,
    pub current_system: Option<String>,
    pub current_path: Option<String>,
    pub external_project_id: Option<String>,
    pub is_on_public_system: Option<bool>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Asset,
    TileServer,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::TileServer => "tile_server",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accessors for the fields the engine reconciles. Backfill and
/// classification only ever see items through this trait.
pub trait LocationTrackable {
    fn kind(&self) -> ItemKind;
    fn id(&self) -> i64;
    fn location(&self) -> &FileLocation;
    fn location_mut(&mut self) -> &mut FileLocation;

    fn original_system(&self) -> Option<&str> {
        self.location().original_system.as_deref()
    }

    fn original_path(&self) -> Option<&str> {
        self.location().original_path.as_deref()
    }

    fn current_system(&self) -> Option<&str> {
        self.location().current_system.as_deref()
    }

    fn current_path(&self) -> Option<&str> {
        self.location().current_path.as_deref()
    }

    fn set_original(&mut self, system: Option<String>, path: Option<String>) {
        let location = self.location_mut();
        location.original_system = system;
        location.original_path = path;
    }

    fn set_current(&mut self, system: Option<String>, path: Option<String>) {
        let location = self.location_mut();
        location.current_system = system;
        location.current_path = path;
    }

    fn set_public(&mut self, is_public: bool) {
        self.location_mut().is_on_public_system = Some(is_public);
    }

    fn set_external_project_id(&mut self, external_project_id: String) {
        self.location_mut().external_project_id = Some(external_project_id);
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.location_mut().last_checked_at = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Image,
    Video,
    PointCloud,
    Streetview,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAsset {
    pub id: i64,
    pub feature_id: i64,
    pub project_id: i64,
    pub asset_type: AssetType,
    #[serde(default)]
    pub point_cloud_id: Option<i64>,
    #[serde(flatten)]
    pub location: FileLocation,
}

impl LocationTrackable for FeatureAsset {
    fn kind(&self) -> ItemKind {
        ItemKind::Asset
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn location(&self) -> &FileLocation {
        &self.location
    }

    fn location_mut(&mut self) -> &mut FileLocation {
        &mut self.location
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileServer {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub kind: String,
    /// Tile servers we host from imported rasters; external ones have no
    /// file to track.
    pub internal: bool,
    #[serde(flatten)]
    pub location: FileLocation,
}

impl LocationTrackable for TileServer {
    fn kind(&self) -> ItemKind {
        ItemKind::TileServer
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn location(&self) -> &FileLocation {
        &self.location
    }

    fn location_mut(&mut self) -> &mut FileLocation {
        &mut self.location
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointCloudFileInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointCloud {
    pub id: i64,
    pub project_id: i64,
    #[serde(default)]
    pub files_info: Vec<PointCloudFileInfo>,
}

impl PointCloud {
    /// Name of the first source file the point cloud was built from.
    pub fn source_filename(&self) -> Option<&str> {
        self.files_info
            .iter()
            .map(|info| info.name.trim())
            .find(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    /// Storage system of the linked external project, if any.
    #[serde(default)]
    pub system_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub process_id: String,
    pub status: TaskStatus,
    pub description: String,
    pub project_id: i64,
    #[serde(default)]
    pub latest_message: Option<String>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
}

/// One row per project. Reused and reset for every new check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRun {
    pub id: i64,
    pub project_id: i64,
    #[serde(default)]
    pub task_id: Option<i64>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub items_checked: u64,
    #[serde(default)]
    pub items_failed: u64,
}

impl ReconciliationRun {
    pub fn is_running(&self) -> bool {
        self.completed_at.is_none()
    }
}
