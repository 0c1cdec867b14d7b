use anyhow::Result;

use crate::commands::CommandReport;
use crate::reconcile::audit;
use crate::reconcile::paths::resolve_paths;
use crate::reconcile::service;
use crate::reconcile::store::Store;

#[derive(Debug, Clone)]
pub struct StartCheckOptions {
    pub project_id: i64,
    pub force: bool,
}

pub fn run(opts: &StartCheckOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let store = Store::open(&paths.store_file);
    let mut report = CommandReport::new("start-check");

    let started = service::start_check(&store, opts.project_id, opts.force)?;
    report.detail(format!("project_id={}", opts.project_id));
    report.detail(format!("run_id={}", started.run_id));
    if let Some(task_id) = started.task_id {
        report.detail(format!("task_id={task_id}"));
    }
    report.detail(format!("already_running={}", started.already_running));

    let status = if started.already_running {
        "already-running"
    } else {
        "queued"
    };
    audit::append_event(
        &paths,
        "start-check",
        status,
        Some(opts.project_id),
        &format!("run_id={}", started.run_id),
    )?;

    Ok(report)
}
