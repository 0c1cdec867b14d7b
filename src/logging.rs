use std::env;
use std::io;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "LOCSYNC_LOG";

fn filter_directive(locsync_log: Option<String>) -> String {
    locsync_log
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "info".to_string())
}

/// Install the stderr subscriber. `RUST_LOG` wins over `LOCSYNC_LOG`;
/// stdout stays reserved for command reports.
pub fn init() {
    let level = filter_directive(env::var(LOG_ENV).ok());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
