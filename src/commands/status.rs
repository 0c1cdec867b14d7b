use anyhow::Result;

use crate::commands::CommandReport;
use crate::reconcile::paths::resolve_paths;
use crate::reconcile::service;
use crate::reconcile::store::Store;

#[derive(Debug, Clone)]
pub struct StatusOptions {
    pub project_id: i64,
    pub files: bool,
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn run(opts: &StatusOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let store = Store::open(&paths.store_file);
    let mut report = CommandReport::new("status");

    report.detail(format!("store_file={}", store.path().display()));
    let Some(summary) = service::get_status(&store, opts.project_id)? else {
        report.issue(format!("no check recorded for project {}", opts.project_id));
        return Ok(report);
    };

    report.detail(format!("project_id={}", summary.project_id));
    report.detail(format!("run_id={}", summary.run_id));
    report.detail(format!("running={}", summary.running));
    report.detail(format!("started_at={}", summary.started_at.to_rfc3339()));
    report.detail(format!(
        "completed_at={}",
        opt(summary.completed_at.map(|t| t.to_rfc3339()))
    ));
    report.detail(format!("total_items={}", summary.total_items));
    report.detail(format!("items_checked={}", summary.items_checked));
    report.detail(format!("items_failed={}", summary.items_failed));
    report.detail(format!("task_id={}", opt(summary.task_id)));
    report.detail(format!("task_status={}", opt(summary.task_status)));
    report.detail(format!("latest_message={}", opt(summary.latest_message)));

    if opts.files {
        for item in service::item_statuses(&store, opts.project_id)? {
            report.detail(format!(
                "{} id={} public={} system={} path={} external_project_id={} last_checked_at={}",
                item.kind,
                item.id,
                opt(item.is_on_public_system),
                opt(item.current_system),
                opt(item.current_path),
                opt(item.external_project_id),
                opt(item.last_checked_at.map(|t| t.to_rfc3339())),
            ));
        }
    }

    Ok(report)
}
