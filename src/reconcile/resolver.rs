use crate::reconcile::file_index::FileIndex;
use crate::reconcile::util::basename;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub found: bool,
    /// Path relative to the index's system root.
    pub path: Option<String>,
}

impl Resolution {
    fn missing() -> Self {
        Self {
            found: false,
            path: None,
        }
    }
}

/// Find where the file named by `candidate_path` lives in `index`.
///
/// Matching is by filename only. When the same name appears in several
/// places the first indexed path wins and the ambiguity is logged for
/// manual review; callers must tolerate an occasional wrong pick.
pub fn resolve(index: &FileIndex, candidate_path: &str) -> Resolution {
    let Some(filename) = basename(candidate_path) else {
        return Resolution::missing();
    };
    let Some(paths) = index.get(filename) else {
        return Resolution::missing();
    };
    let Some(first) = paths.first() else {
        return Resolution::missing();
    };

    if paths.len() > 1 {
        warn!(
            system = %index.system(),
            %filename,
            candidate = %candidate_path,
            matches = ?paths,
            "ambiguous filename match; using first indexed path"
        );
    }

    Resolution {
        found: true,
        path: Some(first.clone()),
    }
}
