//! Append-only JSON-lines trail of check lifecycle events, kept next to the
//! store so operators can see what ran even when task rows are reused.

use crate::reconcile::paths::LocsyncPaths;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

const AUDIT_FILE: &str = "audit.log";

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent<'a> {
    pub at: DateTime<Utc>,
    pub phase: &'a str,
    pub status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    pub message: &'a str,
}

fn audit_log_path(paths: &LocsyncPaths) -> Result<PathBuf> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    Ok(paths.logs_dir.join(AUDIT_FILE))
}

pub fn append_event(
    paths: &LocsyncPaths,
    phase: &str,
    status: &str,
    project_id: Option<i64>,
    message: &str,
) -> Result<()> {
    let event = AuditEvent {
        at: Utc::now(),
        phase,
        status,
        project_id,
        message,
    };
    let mut line = serde_json::to_string(&event)?;
    line.push('\n');

    let path = audit_log_path(paths)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(line.as_bytes()))
        .with_context(|| format!("failed to append to {}", path.display()))
}
