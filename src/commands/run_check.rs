use anyhow::Result;

use crate::commands::CommandReport;
use crate::reconcile::cache::ExternalIdCache;
use crate::reconcile::config::load_config;
use crate::reconcile::model::TaskStatus;
use crate::reconcile::orchestrator::{RunContext, RunOutcome, run_check};
use crate::reconcile::paths::resolve_paths;
use crate::reconcile::service;
use crate::reconcile::store::Store;
use crate::storage;

#[derive(Debug, Clone)]
pub struct RunCheckOptions {
    pub project_id: i64,
    pub user_id: i64,
    /// Queue the check first instead of picking up one queued elsewhere.
    pub start: bool,
}

fn describe(report: &mut CommandReport, outcome: &RunOutcome) {
    report.detail(format!("project_id={}", outcome.project_id));
    if let Some(run_id) = outcome.run_id {
        report.detail(format!("run_id={run_id}"));
    }
    report.detail(format!("status={}", outcome.status));
    report.detail(format!("total_items={}", outcome.total_items));
    report.detail(format!("items_checked={}", outcome.items_checked));
    report.detail(format!("items_failed={}", outcome.failures.len()));
    for failure in &outcome.failures {
        report.detail(format!(
            "failed {} id={} path={} error={}",
            failure.kind, failure.id, failure.path, failure.error
        ));
    }
    report.detail(format!("message={}", outcome.message));
}

pub fn run(opts: &RunCheckOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let config = load_config()?;
    let store = Store::open(&paths.store_file);
    let mut report = CommandReport::new(if opts.start { "check" } else { "run" });

    if opts.start {
        let started = service::start_check(&store, opts.project_id, false)?;
        if started.already_running {
            report.detail(format!("run_id={}", started.run_id));
            report.issue(format!(
                "a check is already running for project {}",
                opts.project_id
            ));
            return Ok(report);
        }
    } else if !service::has_running_check(&store, opts.project_id)? {
        report.issue(format!(
            "no queued check for project {}; run start-check first",
            opts.project_id
        ));
        return Ok(report);
    }

    let ctx = RunContext {
        store: &store,
        config: &config,
        paths: &paths,
    };
    let mut external_ids = ExternalIdCache::new();
    let outcome = run_check(
        &ctx,
        opts.project_id,
        opts.user_id,
        &mut external_ids,
        storage::connect,
    )?;

    describe(&mut report, &outcome);
    if outcome.status == TaskStatus::Failed {
        report.issue(outcome.message.clone());
    }
    Ok(report)
}
