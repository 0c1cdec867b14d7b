use crate::error::ReconcileError;
use crate::reconcile::model::{
    FeatureAsset, ItemKind, LocationTrackable, ReconciliationRun, Task, TaskStatus, TileServer,
};
use crate::reconcile::store::Store;
use crate::reconcile::util::new_process_id;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

pub const REFRESH_DESCRIPTION: &str = "Refreshing public status";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedCheck {
    pub run_id: i64,
    pub task_id: Option<i64>,
    /// A check was already in flight; nothing new was queued.
    pub already_running: bool,
}

/// Queue a check for `project_id`, reusing the project's run row.
///
/// The running-check test and the write happen under one store lock, so
/// two callers racing here get the same run back. `force` restarts a run
/// left unfinished by a killed worker.
pub fn start_check(store: &Store, project_id: i64, force: bool) -> Result<StartedCheck> {
    let process_id = new_process_id();
    store.transaction(|db| {
        if !db.projects.contains_key(&project_id) {
            return Err(ReconcileError::MissingProject(project_id).into());
        }

        let stale_task = match db.run_for_project(project_id) {
            Some(run) if run.is_running() && !force => {
                info!(project_id, run_id = run.id, "check already running");
                return Ok(StartedCheck {
                    run_id: run.id,
                    task_id: run.task_id,
                    already_running: true,
                });
            }
            Some(run) if run.is_running() => run.task_id,
            _ => None,
        };

        let now = Utc::now();
        if let Some(task) = stale_task.and_then(|id| db.tasks.get_mut(&id))
            && !task.status.is_terminal()
        {
            warn!(project_id, task_id = task.id, "superseding unfinished check");
            task.status = TaskStatus::Failed;
            task.latest_message = Some("Superseded by a forced restart".to_string());
            task.updated = Some(now);
        }

        let task_id = db.insert_task(Task {
            id: 0,
            process_id,
            status: TaskStatus::Queued,
            description: REFRESH_DESCRIPTION.to_string(),
            project_id,
            latest_message: None,
            created: now,
            updated: None,
        });

        let run_id = match db.run_for_project_mut(project_id) {
            Some(run) => {
                run.started_at = now;
                run.completed_at = None;
                run.task_id = Some(task_id);
                run.total_items = 0;
                run.items_checked = 0;
                run.items_failed = 0;
                run.id
            }
            None => db.insert_run(ReconciliationRun {
                id: 0,
                project_id,
                task_id: Some(task_id),
                started_at: now,
                completed_at: None,
                total_items: 0,
                items_checked: 0,
                items_failed: 0,
            }),
        };

        info!(project_id, run_id, task_id, "queued check");
        Ok(StartedCheck {
            run_id,
            task_id: Some(task_id),
            already_running: false,
        })
    })
}

pub fn get(store: &Store, project_id: i64) -> Result<Option<ReconciliationRun>> {
    Ok(store.snapshot()?.run_for_project(project_id).cloned())
}

pub fn has_running_check(store: &Store, project_id: i64) -> Result<bool> {
    Ok(get(store, project_id)?.is_some_and(|run| run.is_running()))
}

/// Apply `update` to the project's run row.
pub fn update_run(
    store: &Store,
    project_id: i64,
    update: impl FnOnce(&mut ReconciliationRun),
) -> Result<ReconciliationRun> {
    store.transaction(|db| {
        let run = db
            .run_for_project_mut(project_id)
            .ok_or(ReconcileError::MissingRun(project_id))?;
        update(run);
        Ok(run.clone())
    })
}

pub fn complete_check(store: &Store, project_id: i64) -> Result<ReconciliationRun> {
    update_run(store, project_id, |run| run.completed_at = Some(Utc::now()))
}

/// Set the task's status and latest message.
pub fn update_task_progress(
    store: &Store,
    task_id: i64,
    status: TaskStatus,
    message: &str,
) -> Result<()> {
    store.transaction(|db| {
        let task = db
            .tasks
            .get_mut(&task_id)
            .ok_or(ReconcileError::MissingTask(task_id))?;
        task.status = status;
        task.latest_message = Some(message.to_string());
        task.updated = Some(Utc::now());
        Ok(())
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub project_id: i64,
    pub run_id: i64,
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_items: u64,
    pub items_checked: u64,
    pub items_failed: u64,
    pub task_id: Option<i64>,
    pub task_status: Option<TaskStatus>,
    pub latest_message: Option<String>,
}

/// Per-item location status as shown by `status --files`.
#[derive(Debug, Clone, Serialize)]
pub struct ItemStatus {
    pub kind: ItemKind,
    pub id: i64,
    pub current_system: Option<String>,
    pub current_path: Option<String>,
    pub is_on_public_system: Option<bool>,
    pub external_project_id: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ItemStatus {
    fn of<T: LocationTrackable>(item: &T) -> Self {
        let location = item.location();
        Self {
            kind: item.kind(),
            id: item.id(),
            current_system: location.current_system.clone(),
            current_path: location.current_path.clone(),
            is_on_public_system: location.is_on_public_system,
            external_project_id: location.external_project_id.clone(),
            last_checked_at: location.last_checked_at,
        }
    }
}

pub fn get_status(store: &Store, project_id: i64) -> Result<Option<RunSummary>> {
    let db = store.snapshot()?;
    let Some(run) = db.run_for_project(project_id) else {
        return Ok(None);
    };
    let task = run.task_id.and_then(|id| db.tasks.get(&id));
    Ok(Some(RunSummary {
        project_id,
        run_id: run.id,
        running: run.is_running(),
        started_at: run.started_at,
        completed_at: run.completed_at,
        total_items: run.total_items,
        items_checked: run.items_checked,
        items_failed: run.items_failed,
        task_id: run.task_id,
        task_status: task.map(|t| t.status),
        latest_message: task.and_then(|t| t.latest_message.clone()),
    }))
}

pub fn item_statuses(store: &Store, project_id: i64) -> Result<Vec<ItemStatus>> {
    let db = store.snapshot()?;
    let assets = db.project_assets(project_id).map(ItemStatus::of::<FeatureAsset>);
    let servers = db
        .project_tile_servers(project_id)
        .filter(|server| server.internal)
        .map(ItemStatus::of::<TileServer>);
    Ok(assets.chain(servers).collect())
}
