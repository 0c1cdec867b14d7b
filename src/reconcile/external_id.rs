use crate::reconcile::cache::ExternalIdCache;
use crate::reconcile::config::EngineConfig;
use crate::reconcile::model::LocationTrackable;
use crate::storage::{RemoteStorage, StorageError};
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static PUBLISHED_PROJECT_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|/)(PRJ-\d+)(?:/|$)").expect("published project segment regex should compile")
});

/// External project id embedded in a published path, e.g.
/// `/published-data/PRJ-1234/data/x.jpg` → `PRJ-1234`.
pub fn parse_published_project_id(path: &str) -> Option<&str> {
    PUBLISHED_PROJECT_SEGMENT
        .captures(path)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Look up the external project id owning `system`, at most once per
/// process. Systems outside the project naming convention have none.
pub fn project_id_for_system(
    client: &dyn RemoteStorage,
    engine: &EngineConfig,
    cache: &mut ExternalIdCache,
    system: &str,
) -> Result<Option<String>, StorageError> {
    if engine.project_uuid(system).is_none() {
        return Ok(None);
    }
    cache.get_or_lookup(system, || {
        debug!(%system, "looking up external project id");
        client.resolve_external_project_id(system)
    })
}

/// Refresh the item's external project id. Published paths carry the id
/// in their layout; anything else is attributed to its owning project
/// system. A missing id leaves the stored value alone.
pub fn resolve_external_id<T: LocationTrackable + ?Sized>(
    item: &mut T,
    client: &dyn RemoteStorage,
    engine: &EngineConfig,
    cache: &mut ExternalIdCache,
) -> Result<(), StorageError> {
    if let Some(system) = item.current_system()
        && engine.is_public_system(system)
        && let Some(id) = item.current_path().and_then(parse_published_project_id)
    {
        let id = id.to_string();
        item.set_external_project_id(id);
        return Ok(());
    }

    let owning_system = match item.current_system() {
        Some(system) if engine.project_uuid(system).is_some() => Some(system),
        _ => item.original_system(),
    };
    let Some(owning_system) = owning_system.map(ToOwned::to_owned) else {
        return Ok(());
    };

    if let Some(id) = project_id_for_system(client, engine, cache, &owning_system)? {
        item.set_external_project_id(id);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::model::{AssetType, FeatureAsset, FileLocation};
    use crate::reconcile::testing::FakeStorage;

    fn asset(location: FileLocation) -> FeatureAsset {
        FeatureAsset {
            id: 1,
            feature_id: 1,
            project_id: 1,
            asset_type: AssetType::Image,
            point_cloud_id: None,
            location,
        }
    }

    #[test]
    fn published_segment_is_parsed() {
        assert_eq!(
            parse_published_project_id("/published-data/PRJ-1234/data/x.jpg"),
            Some("PRJ-1234")
        );
        assert_eq!(parse_published_project_id("PRJ-7"), Some("PRJ-7"));
        assert_eq!(parse_published_project_id("/data/PRJ-12a/x.jpg"), None);
        assert_eq!(parse_published_project_id("/data/xPRJ-12/x.jpg"), None);
    }

    #[test]
    fn published_items_are_attributed_without_a_lookup() {
        let storage = FakeStorage::new();
        let engine = EngineConfig::default();
        let mut cache = ExternalIdCache::new();
        let mut item = asset(FileLocation {
            current_system: Some(engine.published_system.clone()),
            current_path: Some("/published-data/PRJ-55/a/x.jpg".to_string()),
            ..FileLocation::default()
        });

        resolve_external_id(&mut item, &storage, &engine, &mut cache).expect("resolve");

        assert_eq!(item.location.external_project_id.as_deref(), Some("PRJ-55"));
        assert!(storage.project_lookups.borrow().is_empty());
    }

    #[test]
    fn project_systems_are_looked_up_once() {
        let storage = FakeStorage::new().with_external_id("project-abc", "PRJ-9");
        let engine = EngineConfig::default();
        let mut cache = ExternalIdCache::new();

        for _ in 0..3 {
            let mut item = asset(FileLocation {
                current_system: Some("project-abc".to_string()),
                current_path: Some("/a/x.jpg".to_string()),
                ..FileLocation::default()
            });
            resolve_external_id(&mut item, &storage, &engine, &mut cache).expect("resolve");
            assert_eq!(item.location.external_project_id.as_deref(), Some("PRJ-9"));
        }

        assert_eq!(storage.project_lookups.borrow().len(), 1);
    }

    #[test]
    fn original_system_is_used_when_current_is_not_a_project() {
        let storage = FakeStorage::new().with_external_id("project-abc", "PRJ-9");
        let engine = EngineConfig::default();
        let mut cache = ExternalIdCache::new();
        let mut item = asset(FileLocation {
            original_system: Some("project-abc".to_string()),
            current_system: Some("designsafe.storage.default".to_string()),
            current_path: Some("/u/x.jpg".to_string()),
            ..FileLocation::default()
        });

        resolve_external_id(&mut item, &storage, &engine, &mut cache).expect("resolve");

        assert_eq!(item.location.external_project_id.as_deref(), Some("PRJ-9"));
    }

    #[test]
    fn unresolvable_id_leaves_existing_value() {
        let storage = FakeStorage::new();
        let engine = EngineConfig::default();
        let mut cache = ExternalIdCache::new();
        let mut item = asset(FileLocation {
            current_system: Some("project-zzz".to_string()),
            external_project_id: Some("PRJ-1".to_string()),
            ..FileLocation::default()
        });

        resolve_external_id(&mut item, &storage, &engine, &mut cache).expect("resolve");

        assert_eq!(item.location.external_project_id.as_deref(), Some("PRJ-1"));
        assert_eq!(storage.project_lookups.borrow().as_slice(), ["project-zzz"]);
    }
}
