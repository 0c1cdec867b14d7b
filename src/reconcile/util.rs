use uuid::Uuid;

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

/// Identifier handed to the external dispatcher for a queued check.
pub fn new_process_id() -> String {
    format!("locsync-{}", Uuid::new_v4())
}

/// Last component of a remote file path. A path ending in `/` names a
/// directory and has no file basename.
pub fn basename(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|name| !name.is_empty())
}

/// Remote paths are stored relative to the system root in indices and
/// absolute on tracked items.
pub fn absolute_remote_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}
