use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::reconcile::config::load_config;
use crate::reconcile::paths::resolve_paths;
use crate::reconcile::store::Store;

include!(concat!(env!("OUT_DIR"), "/locsync_env_allowlist.rs"));

const ENV_PREFIX: &str = "LOCSYNC_";

/// `LOCSYNC_*` variables the binary never reads, usually typos.
fn unknown_env_keys(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unknown = keys
        .into_iter()
        .filter(|key| key.starts_with(ENV_PREFIX))
        .filter(|key| !GENERATED_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect::<Vec<_>>();
    unknown.sort();
    unknown
}

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("verify");
    let paths = resolve_paths()?;
    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("store_file={}", paths.store_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));

    match load_config() {
        Ok(cfg) => {
            report.detail(format!("backend={:?}", cfg.storage.backend).to_ascii_lowercase());
            report.detail(format!("batch_size={}", cfg.engine.batch_size));
            report.detail(format!(
                "public_systems={}",
                cfg.engine.public_systems.join(",")
            ));
        }
        Err(err) => report.issue(format!("config invalid: {err:#}")),
    }

    match Store::open(&paths.store_file).snapshot() {
        Ok(db) => {
            report.detail(format!("schema_version={}", db.schema_version));
            report.detail(format!("projects={}", db.projects.len()));
            report.detail(format!("runs={}", db.runs.len()));
        }
        Err(err) => report.issue(format!("store unreadable: {err:#}")),
    }

    for key in unknown_env_keys(env::vars().map(|(key, _)| key)) {
        report.issue(format!("unrecognized environment variable {key}"));
    }

    Ok(report)
}
