use crate::error::ReconcileError;
use crate::reconcile::audit;
use crate::reconcile::backfill::{BackfillContext, backfill};
use crate::reconcile::cache::{ExternalIdCache, OwnerIndexCache, PublishedIndexCache};
use crate::reconcile::classifier::{Classifier, Verdict};
use crate::reconcile::config::{EngineConfig, ReconcileConfig};
use crate::reconcile::external_id::resolve_external_id;
use crate::reconcile::model::{
    AssetType, ItemKind, LocationTrackable, PointCloud, Project, ReconciliationRun, TaskStatus,
};
use crate::reconcile::paths::LocsyncPaths;
use crate::reconcile::service;
use crate::reconcile::session::Session;
use crate::reconcile::store::{Database, Store};
use crate::reconcile::util::truncate_with_ellipsis;
use crate::storage::RemoteStorage;
use anyhow::{Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

pub struct RunContext<'a> {
    pub store: &'a Store,
    pub config: &'a ReconcileConfig,
    pub paths: &'a LocsyncPaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub kind: ItemKind,
    pub id: i64,
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub project_id: i64,
    pub run_id: Option<i64>,
    pub status: TaskStatus,
    pub total_items: u64,
    pub items_checked: u64,
    pub failures: Vec<ItemFailure>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkItem {
    Asset(i64),
    TileServer(i64),
}

struct Setup {
    project: Project,
    token: String,
    run: ReconciliationRun,
    point_clouds: BTreeMap<i64, PointCloud>,
    work: Vec<WorkItem>,
}

/// Assets with a recorded origin (or a point cloud whose origin may be
/// recoverable), then internal tile servers, in id order.
fn select_work(db: &Database, project_id: i64) -> Vec<WorkItem> {
    let assets = db
        .project_assets(project_id)
        .filter(|asset| {
            asset.original_path().is_some() || asset.asset_type == AssetType::PointCloud
        })
        .map(|asset| WorkItem::Asset(asset.id));
    let servers = db
        .project_tile_servers(project_id)
        .filter(|server| server.internal)
        .map(|server| WorkItem::TileServer(server.id));
    assets.chain(servers).collect()
}

fn load_setup(store: &Store, project_id: i64, user_id: i64) -> Result<Setup> {
    let db = store.snapshot()?;
    let project = db
        .projects
        .get(&project_id)
        .cloned()
        .ok_or(ReconcileError::MissingProject(project_id))?;
    let user = db
        .users
        .get(&user_id)
        .ok_or(ReconcileError::MissingUser(user_id))?;
    let token = user
        .token
        .clone()
        .filter(|token| !token.trim().is_empty())
        .ok_or(ReconcileError::MissingCredentials(user_id))?;
    let run = db
        .run_for_project(project_id)
        .cloned()
        .ok_or(ReconcileError::MissingRun(project_id))?;

    let point_clouds = db
        .point_clouds
        .values()
        .filter(|pc| pc.project_id == project_id)
        .map(|pc| (pc.id, pc.clone()))
        .collect();
    let work = select_work(&db, project_id);

    Ok(Setup {
        project,
        token,
        run,
        point_clouds,
        work,
    })
}

struct ItemPass<'a> {
    client: &'a dyn RemoteStorage,
    classifier: Classifier<'a>,
    provenance: BackfillContext<'a>,
    published: PublishedIndexCache,
    owners: OwnerIndexCache,
    external_ids: &'a mut ExternalIdCache,
}

impl ItemPass<'_> {
    fn reconcile<T: LocationTrackable>(
        &mut self,
        item: &mut T,
        engine: &EngineConfig,
    ) -> Result<Verdict> {
        let verdict = self
            .classifier
            .classify(item, &mut self.published, self.external_ids)?;
        resolve_external_id(item, self.client, engine, self.external_ids)?;
        log_verdict(item.kind(), item.id(), &verdict);
        Ok(verdict)
    }

    fn process(
        &mut self,
        session: &mut Session<'_>,
        work: WorkItem,
        engine: &EngineConfig,
    ) -> Result<()> {
        let now = Utc::now();
        match work {
            WorkItem::Asset(id) => {
                let mut asset = session
                    .asset(id)?
                    .ok_or_else(|| anyhow!("asset {id} no longer exists"))?;
                asset.touch(now);
                let repaired = backfill(&mut asset, &self.provenance, &mut self.owners)?;
                debug!(
                    asset_id = id,
                    origin_path = repaired.origin_path,
                    origin_system = repaired.origin_system,
                    current = repaired.current,
                    "provenance pass"
                );
                self.reconcile(&mut asset, engine)?;
                session.stage(&asset);
            }
            WorkItem::TileServer(id) => {
                let mut server = session
                    .tile_server(id)?
                    .ok_or_else(|| anyhow!("tile server {id} no longer exists"))?;
                server.touch(now);
                self.reconcile(&mut server, engine)?;
                session.stage(&server);
            }
        }
        Ok(())
    }
}

fn log_verdict(kind: ItemKind, id: i64, verdict: &Verdict) {
    match verdict {
        Verdict::Relocated { system, path } => {
            debug!(%kind, id, %system, %path, "relocated to published copy");
        }
        Verdict::Public => debug!(%kind, id, "on a public system"),
        Verdict::NotPublic => debug!(%kind, id, "not public"),
        Verdict::Unknown => debug!(%kind, id, "public status unknown"),
    }
}

fn failure_path(session: &mut Session<'_>, work: WorkItem) -> String {
    let path = match work {
        WorkItem::Asset(id) => session
            .asset(id)
            .ok()
            .flatten()
            .and_then(|a| a.location.original_path),
        WorkItem::TileServer(id) => session
            .tile_server(id)
            .ok()
            .flatten()
            .and_then(|t| t.location.original_path),
    };
    path.unwrap_or_else(|| "unknown".to_string())
}

fn checkpoint(
    ctx: &RunContext<'_>,
    session: &mut Session<'_>,
    setup: &Setup,
    processed: u64,
    failed: u64,
) -> Result<()> {
    session.commit()?;
    session.expire_all();

    let total = setup.work.len();
    service::update_run(ctx.store, setup.project.id, |run| {
        run.items_checked = processed - failed;
        run.items_failed = failed;
    })?;
    info!(project_id = setup.project.id, processed, total, failed, "batch committed");
    if let Some(task_id) = setup.run.task_id {
        service::update_task_progress(
            ctx.store,
            task_id,
            TaskStatus::Running,
            &format!("Processed {processed}/{total} files ({failed} errors)"),
        )?;
    }
    Ok(())
}

fn execute<S, F>(
    ctx: &RunContext<'_>,
    setup: Setup,
    external_ids: &mut ExternalIdCache,
    connect: F,
) -> Result<RunOutcome>
where
    S: RemoteStorage,
    F: FnOnce(&ReconcileConfig, &str) -> Result<S>,
{
    let project_id = setup.project.id;
    let total = setup.work.len() as u64;

    service::update_run(ctx.store, project_id, |run| {
        run.total_items = total;
        run.items_checked = 0;
        run.items_failed = 0;
    })?;
    if let Some(task_id) = setup.run.task_id {
        service::update_task_progress(
            ctx.store,
            task_id,
            TaskStatus::Running,
            &format!("Checking {total} files for public availability"),
        )?;
    }
    info!(project_id, run_id = setup.run.id, total, "starting location check");
    audit::append_event(
        ctx.paths,
        "check",
        "started",
        Some(project_id),
        &format!("{total} items"),
    )?;

    let storage = connect(ctx.config, &setup.token)?;
    let engine = &ctx.config.engine;
    let batch_size = engine.batch_size.max(1);
    let mut session = Session::new(ctx.store);
    let mut pass = ItemPass {
        client: &storage,
        classifier: Classifier::new(&storage, engine),
        provenance: BackfillContext {
            client: &storage,
            engine,
            project: &setup.project,
            point_clouds: &setup.point_clouds,
        },
        published: PublishedIndexCache::new(),
        owners: OwnerIndexCache::new(),
        external_ids,
    };

    let swept = setup.work.iter().copied().enumerate().try_fold(
        (0u64, Vec::<ItemFailure>::new()),
        |(ok, mut failures), (index, work)| -> Result<_> {
            let ok = match pass.process(&mut session, work, engine) {
                Ok(()) => ok + 1,
                Err(err) => {
                    let path = failure_path(&mut session, work);
                    let (kind, id) = match work {
                        WorkItem::Asset(id) => (ItemKind::Asset, id),
                        WorkItem::TileServer(id) => (ItemKind::TileServer, id),
                    };
                    let detail = format!("{err:#}");
                    warn!(%kind, id, %path, error = %detail, "item check failed");
                    failures.push(ItemFailure {
                        kind,
                        id,
                        path,
                        error: truncate_with_ellipsis(&detail, engine.item_error_max_chars),
                    });
                    ok
                }
            };

            let processed = index as u64 + 1;
            if processed % batch_size as u64 == 0 {
                checkpoint(ctx, &mut session, &setup, processed, failures.len() as u64)?;
            }
            Ok((ok, failures))
        },
    );
    let (successes, failures) = match swept {
        Ok(swept) => swept,
        Err(err) => {
            debug!(project_id, discarded = session.pending_len(), "discarding uncommitted batch");
            session.rollback();
            return Err(err);
        }
    };

    session.commit()?;
    info!(
        project_id,
        published_indexes = pass.published.len(),
        owner_indexes = pass.owners.len(),
        external_ids = pass.external_ids.len(),
        "index caches used"
    );
    let failed = failures.len() as u64;
    let run = service::update_run(ctx.store, project_id, |run| {
        run.completed_at = Some(Utc::now());
        run.items_checked = total - failed;
        run.items_failed = failed;
    })?;

    let message = if failures.is_empty() {
        format!("Successfully checked all {total} files")
    } else {
        warn!(project_id, failed, failures = ?failures, "check completed with failures");
        format!("Checked {total} files: {successes} successful, {failed} failed")
    };
    info!(project_id, %message, "check completed");

    // The run is finalized; nothing below may turn it into a failure.
    if let Some(task_id) = run.task_id
        && let Err(err) =
            service::update_task_progress(ctx.store, task_id, TaskStatus::Completed, &message)
    {
        warn!(project_id, task_id, error = %err, "failed to mark task completed");
    }
    let status = if failures.is_empty() {
        "completed"
    } else {
        "completed_with_errors"
    };
    if let Err(err) = audit::append_event(ctx.paths, "check", status, Some(project_id), &message) {
        warn!(project_id, error = %err, "failed to write completion audit event");
    }

    Ok(RunOutcome {
        project_id,
        run_id: Some(run.id),
        status: TaskStatus::Completed,
        total_items: total,
        items_checked: run.items_checked,
        failures,
        message,
    })
}

/// Mark the run and its task failed. Counters reached so far are kept.
fn fail_run(
    ctx: &RunContext<'_>,
    project_id: i64,
    run: Option<&ReconciliationRun>,
    err: &anyhow::Error,
) -> Result<RunOutcome> {
    let detail = format!("{err:#}");
    let message = format!(
        "Check failed: {}",
        truncate_with_ellipsis(&detail, ctx.config.engine.run_error_max_chars)
    );
    error!(project_id, error = %detail, "check failed");

    let persisted = run
        .map(|run| -> Result<ReconciliationRun> {
            let updated = service::complete_check(ctx.store, project_id)?;
            if let Some(task_id) = run.task_id {
                service::update_task_progress(ctx.store, task_id, TaskStatus::Failed, &message)?;
            }
            Ok(updated)
        })
        .transpose()
        .map_err(|persist_err| {
            error!(project_id, error = %persist_err, "failed to mark check as failed");
            persist_err.context(format!(
                "check for project {project_id} failed and could not be marked failed"
            ))
        })?;

    if let Err(audit_err) =
        audit::append_event(ctx.paths, "check", "failed", Some(project_id), &message)
    {
        warn!(project_id, error = %audit_err, "failed to write failure audit event");
    }

    Ok(RunOutcome {
        project_id,
        run_id: persisted.as_ref().map(|run| run.id),
        status: TaskStatus::Failed,
        total_items: persisted.as_ref().map_or(0, |run| run.total_items),
        items_checked: persisted.as_ref().map_or(0, |run| run.items_checked),
        failures: Vec::new(),
        message,
    })
}

/// Worker-side body of a check: reconcile every tracked item of
/// `project_id` using `user_id`'s credentials.
///
/// Item failures are recorded and skipped. Any other error before the run
/// is finalized fails the run; that state is persisted and only a failure
/// to persist it is returned as an error. Once the run is finalized the
/// task update and audit entry are best-effort.
pub fn run_check<S, F>(
    ctx: &RunContext<'_>,
    project_id: i64,
    user_id: i64,
    external_ids: &mut ExternalIdCache,
    connect: F,
) -> Result<RunOutcome>
where
    S: RemoteStorage,
    F: FnOnce(&ReconcileConfig, &str) -> Result<S>,
{
    info!(project_id, user_id, "running location check");
    let existing_run = service::get(ctx.store, project_id)?;

    let outcome = load_setup(ctx.store, project_id, user_id)
        .and_then(|setup| execute(ctx, setup, external_ids, connect));
    match outcome {
        Ok(outcome) => Ok(outcome),
        Err(err) => fail_run(ctx, project_id, existing_run.as_ref(), &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::model::{FeatureAsset, FileLocation, TileServer, User};
    use crate::reconcile::testing::{FakeStorage, ObservedStorage};
    use crate::storage::StorageError;
    use std::cell::{Cell, RefCell};
    use std::path::Path;
    use tempfile::tempdir;

    const OWNER: &str = "project-abc";
    const PUBLISHED: &str = "designsafe.storage.published";

    fn paths(root: &Path) -> LocsyncPaths {
        LocsyncPaths {
            home: root.to_path_buf(),
            store_file: root.join("store.json"),
            logs_dir: root.join("logs"),
        }
    }

    fn asset(id: i64, location: FileLocation) -> FeatureAsset {
        FeatureAsset {
            id,
            feature_id: id,
            project_id: 1,
            asset_type: AssetType::Image,
            point_cloud_id: None,
            location,
        }
    }

    fn on_owner(path: &str) -> FileLocation {
        FileLocation {
            original_system: Some(OWNER.to_string()),
            original_path: Some(path.to_string()),
            ..FileLocation::default()
        }
    }

    fn without_system(path: &str) -> FileLocation {
        FileLocation {
            original_path: Some(path.to_string()),
            ..FileLocation::default()
        }
    }

    fn seed(store: &Store, assets: Vec<FeatureAsset>) {
        store
            .transaction(|db| {
                db.projects.insert(
                    1,
                    Project {
                        id: 1,
                        name: "map".to_string(),
                        system_id: Some(OWNER.to_string()),
                    },
                );
                db.users.insert(
                    2,
                    User {
                        id: 2,
                        username: "ana".to_string(),
                        token: Some("secret".to_string()),
                    },
                );
                for asset in assets {
                    db.assets.insert(asset.id, asset);
                }
                Ok(())
            })
            .expect("seed");
    }

    fn storage() -> FakeStorage {
        FakeStorage::new()
            .with_external_id(OWNER, "PRJ-1234")
            .with_file(OWNER, "old/x.jpg")
            .with_file(OWNER, "data/y.jpg")
            .with_file(PUBLISHED, "published-data/PRJ-1234/a/x.jpg")
    }

    fn run(
        store: &Store,
        config: &ReconcileConfig,
        root: &Path,
        fake: &FakeStorage,
    ) -> RunOutcome {
        let paths = paths(root);
        let ctx = RunContext {
            store,
            config,
            paths: &paths,
        };
        run_check(&ctx, 1, 2, &mut ExternalIdCache::new(), |_, _| Ok(fake)).expect("run")
    }

    #[test]
    fn moved_file_is_reclassified_and_unmoved_file_is_not() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(
            &store,
            vec![asset(1, on_owner("/old/x.jpg")), asset(2, on_owner("/data/y.jpg"))],
        );
        service::start_check(&store, 1, false).expect("start");
        let fake = storage();

        let outcome = run(&store, &ReconcileConfig::default(), tmp.path(), &fake);

        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.message, "Successfully checked all 2 files");
        let db = store.snapshot().expect("snapshot");
        let moved = &db.assets[&1].location;
        assert_eq!(moved.current_system.as_deref(), Some(PUBLISHED));
        assert_eq!(moved.current_path.as_deref(), Some("/published-data/PRJ-1234/a/x.jpg"));
        assert_eq!(moved.original_path.as_deref(), Some("/old/x.jpg"));
        assert_eq!(moved.is_on_public_system, Some(true));
        assert_eq!(moved.external_project_id.as_deref(), Some("PRJ-1234"));
        assert!(moved.last_checked_at.is_some());

        let kept = &db.assets[&2].location;
        assert_eq!(kept.current_system.as_deref(), Some(OWNER));
        assert_eq!(kept.is_on_public_system, Some(false));

        let run = db.run_for_project(1).expect("run");
        assert!(run.completed_at.is_some());
        assert_eq!((run.total_items, run.items_checked, run.items_failed), (2, 2, 0));
        let task = &db.tasks[&run.task_id.expect("task")];
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn one_failing_item_does_not_stop_the_run() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        let mut needs_system = on_owner("/broken/z.jpg");
        needs_system.original_system = None;
        seed(
            &store,
            vec![
                asset(1, on_owner("/old/x.jpg")),
                asset(2, needs_system),
                asset(3, on_owner("/data/y.jpg")),
            ],
        );
        service::start_check(&store, 1, false).expect("start");
        let fake = storage()
            .with_file(OWNER, "broken/z.jpg")
            .failing_on(OWNER, "/broken/z.jpg");

        let outcome = run(&store, &ReconcileConfig::default(), tmp.path(), &fake);

        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.items_checked, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].id, 2);
        assert_eq!(outcome.failures[0].path, "/broken/z.jpg");
        assert!(outcome.failures[0].error.chars().count() <= 101);
        assert_eq!(outcome.message, "Checked 3 files: 2 successful, 1 failed");

        let db = store.snapshot().expect("snapshot");
        assert_eq!(db.assets[&2].location.last_checked_at, None);
        assert_eq!(db.assets[&1].location.is_on_public_system, Some(true));
        assert_eq!(db.assets[&3].location.is_on_public_system, Some(false));
        let run = db.run_for_project(1).expect("run");
        assert_eq!((run.items_checked, run.items_failed), (2, 1));
    }

    #[test]
    fn rerunning_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(
            &store,
            vec![asset(1, on_owner("/old/x.jpg")), asset(2, on_owner("/data/y.jpg"))],
        );
        let fake = storage();
        let config = ReconcileConfig::default();

        service::start_check(&store, 1, false).expect("start");
        run(&store, &config, tmp.path(), &fake);
        let first = store.snapshot().expect("first");

        service::start_check(&store, 1, false).expect("restart");
        run(&store, &config, tmp.path(), &fake);
        let second = store.snapshot().expect("second");

        for id in [1, 2] {
            let mut a = first.assets[&id].location.clone();
            let mut b = second.assets[&id].location.clone();
            a.last_checked_at = None;
            b.last_checked_at = None;
            assert_eq!(a, b);
        }
    }

    #[test]
    fn batches_checkpoint_progress() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        let assets = (1..=5)
            .map(|id| asset(id, on_owner("/data/y.jpg")))
            .collect();
        seed(&store, assets);
        store
            .transaction(|db| {
                db.tile_servers.insert(
                    9,
                    TileServer {
                        id: 9,
                        project_id: 1,
                        name: "ortho".to_string(),
                        kind: "cog".to_string(),
                        internal: true,
                        location: FileLocation {
                            current_system: Some(PUBLISHED.to_string()),
                            current_path: Some("/published-data/PRJ-77/t.tif".to_string()),
                            ..FileLocation::default()
                        },
                    },
                );
                db.tile_servers.insert(
                    10,
                    TileServer {
                        id: 10,
                        project_id: 1,
                        name: "osm".to_string(),
                        kind: "xyz".to_string(),
                        internal: false,
                        location: FileLocation::default(),
                    },
                );
                Ok(())
            })
            .expect("tile servers");
        service::start_check(&store, 1, false).expect("start");
        let mut config = ReconcileConfig::default();
        config.engine.batch_size = 2;

        let outcome = run(&store, &config, tmp.path(), &storage());

        assert_eq!(outcome.total_items, 6);
        assert_eq!(outcome.items_checked, 6);
        let db = store.snapshot().expect("snapshot");
        let server = &db.tile_servers[&9].location;
        assert_eq!(server.is_on_public_system, Some(true));
        assert_eq!(server.external_project_id.as_deref(), Some("PRJ-77"));
        assert_eq!(db.tile_servers[&10].location.last_checked_at, None);

        let audit = std::fs::read_to_string(tmp.path().join("logs/audit.log")).expect("audit");
        assert!(audit.contains("\"status\":\"started\""));
        assert!(audit.contains("\"status\":\"completed\""));
    }

    #[test]
    fn checkpoints_publish_counters_and_progress_mid_run() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(
            &store,
            vec![
                asset(1, on_owner("/old/x.jpg")),
                asset(2, without_system("/broken/z.jpg")),
                asset(3, without_system("/data/y.jpg")),
                asset(4, on_owner("/data/y.jpg")),
            ],
        );
        let started = service::start_check(&store, 1, false).expect("start");
        let task_id = started.task_id.expect("task");
        let mut config = ReconcileConfig::default();
        config.engine.batch_size = 2;
        let fake = storage()
            .with_file(OWNER, "broken/z.jpg")
            .failing_on(OWNER, "/broken/z.jpg");
        let seen = RefCell::new(None);
        let observed = ObservedStorage {
            inner: &fake,
            on_list: |system: &str, path: &str| {
                if system == OWNER && path == "/data/y.jpg" {
                    let db = store.snapshot().expect("mid-run snapshot");
                    let run = db.run_for_project(1).expect("run").clone();
                    let message = db.tasks[&task_id].latest_message.clone();
                    *seen.borrow_mut() = Some((run, message));
                }
            },
        };
        let paths = paths(tmp.path());
        let ctx = RunContext {
            store: &store,
            config: &config,
            paths: &paths,
        };

        let outcome =
            run_check(&ctx, 1, 2, &mut ExternalIdCache::new(), |_, _| Ok(observed)).expect("run");

        let (mid_run, message) = seen.into_inner().expect("third item listed its origin");
        assert_eq!(mid_run.total_items, 4);
        assert_eq!((mid_run.items_checked, mid_run.items_failed), (1, 1));
        assert!(mid_run.completed_at.is_none());
        assert_eq!(message.as_deref(), Some("Processed 2/4 files (1 errors)"));

        assert_eq!(outcome.items_checked, 3);
        assert_eq!(outcome.failures.len(), 1);
        let db = store.snapshot().expect("snapshot");
        assert_eq!(
            db.tasks[&task_id].latest_message.as_deref(),
            Some("Checked 4 files: 3 successful, 1 failed")
        );
    }

    #[test]
    fn private_project_file_found_in_published_copy_becomes_public() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(
            &store,
            vec![asset(
                1,
                FileLocation {
                    original_system: Some("private-project-42".to_string()),
                    original_path: Some("/data/report.tif".to_string()),
                    current_system: Some("private-project-42".to_string()),
                    current_path: Some("/data/report.tif".to_string()),
                    ..FileLocation::default()
                },
            )],
        );
        service::start_check(&store, 1, false).expect("start");
        let mut config = ReconcileConfig::default();
        config.engine.project_system_prefix = "private-project-".to_string();
        config.engine.published_root_template = "/published/{project_id}/".to_string();
        let fake = FakeStorage::new()
            .with_external_id("private-project-42", "PRJ-1")
            .with_file(PUBLISHED, "published/PRJ-1/report.tif");

        let outcome = run(&store, &config, tmp.path(), &fake);

        assert_eq!(outcome.status, TaskStatus::Completed);
        let db = store.snapshot().expect("snapshot");
        let location = &db.assets[&1].location;
        assert_eq!(location.is_on_public_system, Some(true));
        assert_eq!(location.current_system.as_deref(), Some(PUBLISHED));
        assert_eq!(location.current_path.as_deref(), Some("/published/PRJ-1/report.tif"));
        assert_eq!(location.original_system.as_deref(), Some("private-project-42"));
        assert_eq!(location.external_project_id.as_deref(), Some("PRJ-1"));
        assert_eq!(*fake.project_lookups.borrow(), vec!["private-project-42".to_string()]);
    }

    #[test]
    fn completion_audit_failure_keeps_run_completed() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(&store, vec![asset(1, without_system("/data/y.jpg"))]);
        let started = service::start_check(&store, 1, false).expect("start");
        let audit_log = tmp.path().join("logs/audit.log");
        let fake = storage();
        let observed = ObservedStorage {
            inner: &fake,
            on_list: |_: &str, _: &str| {
                if audit_log.is_file() {
                    std::fs::remove_file(&audit_log).expect("remove audit log");
                    std::fs::create_dir(&audit_log).expect("block audit log");
                }
            },
        };
        let paths = paths(tmp.path());
        let config = ReconcileConfig::default();
        let ctx = RunContext {
            store: &store,
            config: &config,
            paths: &paths,
        };

        let outcome = run_check(&ctx, 1, 2, &mut ExternalIdCache::new(), |_, _| Ok(observed))
            .expect("finalized run stays ok");

        assert!(audit_log.is_dir());
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.message, "Successfully checked all 1 files");
        let db = store.snapshot().expect("snapshot");
        let run = db.run_for_project(1).expect("run");
        assert!(run.completed_at.is_some());
        assert_eq!((run.items_checked, run.items_failed), (1, 0));
        let task = &db.tasks[&started.task_id.expect("task")];
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.latest_message.as_deref(), Some("Successfully checked all 1 files"));
    }

    #[test]
    fn failed_run_is_persisted_even_when_audit_log_is_unwritable() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(&store, vec![asset(1, on_owner("/old/x.jpg"))]);
        let started = service::start_check(&store, 1, false).expect("start");
        std::fs::create_dir_all(tmp.path().join("logs/audit.log")).expect("block audit log");
        let paths = paths(tmp.path());
        let config = ReconcileConfig::default();
        let ctx = RunContext {
            store: &store,
            config: &config,
            paths: &paths,
        };

        let outcome = run_check(&ctx, 1, 404, &mut ExternalIdCache::new(), |_, _| {
            Ok(FakeStorage::new())
        })
        .expect("failure is persisted");

        assert_eq!(outcome.status, TaskStatus::Failed);
        let db = store.snapshot().expect("snapshot");
        assert_eq!(db.tasks[&started.task_id.expect("task")].status, TaskStatus::Failed);
    }

    #[test]
    fn missing_user_fails_without_touching_storage() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(&store, vec![asset(1, on_owner("/old/x.jpg"))]);
        let started = service::start_check(&store, 1, false).expect("start");
        let paths = paths(tmp.path());
        let config = ReconcileConfig::default();
        let ctx = RunContext {
            store: &store,
            config: &config,
            paths: &paths,
        };
        let connected = Cell::new(false);

        let outcome = run_check(&ctx, 1, 404, &mut ExternalIdCache::new(), |_, _| {
            connected.set(true);
            Ok(FakeStorage::new())
        })
        .expect("failure is persisted");

        assert!(!connected.get());
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.message, "Check failed: user 404 not found");
        let db = store.snapshot().expect("snapshot");
        let run = db.run_for_project(1).expect("run");
        assert!(run.completed_at.is_some());
        assert_eq!(db.tasks[&started.task_id.expect("task")].status, TaskStatus::Failed);
        assert_eq!(db.assets[&1].location.last_checked_at, None);
    }

    #[test]
    fn missing_run_fails_the_check() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(&store, vec![]);

        let outcome = run(&store, &ReconcileConfig::default(), tmp.path(), &storage());

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.run_id, None);
        assert!(outcome.message.contains("no reconciliation run"));
    }

    #[test]
    fn connection_errors_fail_the_run() {
        let tmp = tempdir().expect("tempdir");
        let store = Store::open(tmp.path().join("store.json"));
        seed(&store, vec![asset(1, on_owner("/old/x.jpg"))]);
        service::start_check(&store, 1, false).expect("start");
        let paths = paths(tmp.path());
        let config = ReconcileConfig::default();
        let ctx = RunContext {
            store: &store,
            config: &config,
            paths: &paths,
        };

        let outcome = run_check(&ctx, 1, 2, &mut ExternalIdCache::new(), |_, _| {
            Err::<FakeStorage, _>(anyhow::Error::new(StorageError::Decode("bad token".to_string())))
        })
        .expect("failure is persisted");

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.message.starts_with("Check failed: "));
        assert!(!service::has_running_check(&store, 1).expect("idle"));
        let summary = service::get_status(&store, 1).expect("status").expect("summary");
        assert_eq!(summary.total_items, 1);
        assert_eq!(summary.task_status, Some(TaskStatus::Failed));
    }
}
