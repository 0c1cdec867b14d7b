use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(locsync_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    match locsync_home {
        Some(home) => Some(home.join(".env")),
        None => Some(home_dir?.join(".locsync/.env")),
    }
}

fn non_blank_var(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Load environment defaults and return the file they came from.
///
/// `LOCSYNC_ENV_FILE` wins outright; otherwise `.env` in the working
/// directory, then the one under the locsync home. Variables already set in
/// the process environment are never overwritten.
pub fn load_dotenv() -> Option<PathBuf> {
    if let Some(explicit) = non_blank_var("LOCSYNC_ENV_FILE") {
        return dotenvy::from_path(&explicit).ok().map(|()| explicit);
    }

    if let Ok(path) = dotenvy::dotenv() {
        return Some(path);
    }

    let path = fallback_dotenv_path(non_blank_var("LOCSYNC_HOME"), dirs::home_dir())?;
    if !path.is_file() {
        return None;
    }
    dotenvy::from_path(&path).ok().map(|()| path)
}
