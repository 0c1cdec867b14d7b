use thiserror::Error;

/// Conditions that abort a whole reconciliation run rather than one item.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("project {0} not found")]
    MissingProject(i64),
    #[error("user {0} not found")]
    MissingUser(i64),
    #[error("user {0} has no storage credentials")]
    MissingCredentials(i64),
    #[error("no reconciliation run recorded for project {0}")]
    MissingRun(i64),
    #[error("task {0} not found")]
    MissingTask(i64),
    #[error("store file invalid or unreadable: {0}")]
    StoreCorrupt(String),
}
