use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::error::ReconcileError;
use crate::reconcile::config::load_config;
use crate::reconcile::file_index::build_index;
use crate::reconcile::paths::resolve_paths;
use crate::reconcile::store::Store;
use crate::storage;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub system: String,
    pub path: String,
    pub user_id: Option<i64>,
}

fn resolve_token(user_id: Option<i64>) -> Result<String> {
    let Some(user_id) = user_id else {
        return Ok(env::var("LOCSYNC_TAPIS_TOKEN").unwrap_or_default());
    };
    let paths = resolve_paths()?;
    let db = Store::open(&paths.store_file).snapshot()?;
    let user = db
        .users
        .get(&user_id)
        .ok_or(ReconcileError::MissingUser(user_id))?;
    Ok(user.token.clone().unwrap_or_default())
}

pub fn run(opts: &IndexOptions) -> Result<CommandReport> {
    let config = load_config()?;
    let token = resolve_token(opts.user_id)?;
    let client = storage::connect(&config, &token)?;
    let mut report = CommandReport::new("index");

    let index = build_index(client.as_ref(), &config.engine, &opts.system, &opts.path);
    let stats = index.stats();
    report.detail(format!("system={}", index.system()));
    report.detail(format!("path={}", opts.path));
    report.detail(format!("unique_filenames={}", index.len()));
    report.detail(format!("files={}", stats.files));
    report.detail(format!("directories={}", stats.directories));
    report.detail(format!("skipped_subtrees={}", stats.skipped_subtrees));
    report.detail(format!("skipped_trash={}", stats.skipped_trash));
    if index.is_empty() {
        report.detail("no files indexed");
    }
    for (filename, paths) in index.iter() {
        report.detail(format!("{filename} -> {}", paths.join(", ")));
    }

    Ok(report)
}
