use crate::reconcile::cache::OwnerIndexCache;
use crate::reconcile::config::EngineConfig;
use crate::reconcile::file_index::build_index;
use crate::reconcile::model::{AssetType, FeatureAsset, LocationTrackable, PointCloud, Project};
use crate::reconcile::resolver::resolve;
use crate::reconcile::util::absolute_remote_path;
use crate::storage::{RemoteStorage, StorageError};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Read-only inputs shared by every item of a run.
pub struct BackfillContext<'a> {
    pub client: &'a dyn RemoteStorage,
    pub engine: &'a EngineConfig,
    pub project: &'a Project,
    pub point_clouds: &'a BTreeMap<i64, PointCloud>,
}

impl BackfillContext<'_> {
    fn owning_system(&self) -> Option<&str> {
        self.project
            .system_id
            .as_deref()
            .filter(|system| !system.is_empty())
    }
}

/// Which repairs changed the item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backfilled {
    pub origin_path: bool,
    pub origin_system: bool,
    pub current: bool,
}

impl Backfilled {
    pub fn any(self) -> bool {
        self.origin_path || self.origin_system || self.current
    }
}

/// Repair missing provenance on a legacy asset. Safe to run repeatedly:
/// populated fields are never touched, and a repair that cannot be
/// confirmed leaves its fields empty. Only transport failures are errors.
pub fn backfill(
    asset: &mut FeatureAsset,
    ctx: &BackfillContext<'_>,
    owner_indexes: &mut OwnerIndexCache,
) -> Result<Backfilled, StorageError> {
    let origin_path = recover_point_cloud_source(asset, ctx, owner_indexes)?;
    let origin_system = recover_origin_system(asset, ctx)?;
    let current = fill_current_from_origin(asset);

    let done = Backfilled {
        origin_path,
        origin_system,
        current,
    };
    if done.any() {
        debug!(asset_id = asset.id, ?done, "backfilled provenance");
    }
    Ok(done)
}

fn recover_point_cloud_source(
    asset: &mut FeatureAsset,
    ctx: &BackfillContext<'_>,
    owner_indexes: &mut OwnerIndexCache,
) -> Result<bool, StorageError> {
    if asset.original_path().is_some() || asset.asset_type != AssetType::PointCloud {
        return Ok(false);
    }
    let Some(filename) = asset
        .point_cloud_id
        .and_then(|id| ctx.point_clouds.get(&id))
        .and_then(PointCloud::source_filename)
    else {
        return Ok(false);
    };
    let Some(owning_system) = ctx.owning_system() else {
        return Ok(false);
    };
    if asset.original_system().is_some_and(|system| system != owning_system) {
        return Ok(false);
    }

    let index = owner_indexes.get_or_build(owning_system, || {
        build_index(ctx.client, ctx.engine, owning_system, "/")
    });
    let resolution = resolve(index, filename);
    let (true, Some(found)) = (resolution.found, resolution.path) else {
        debug!(asset_id = asset.id, %filename, "point cloud source not found on owning system");
        return Ok(false);
    };

    let path = absolute_remote_path(&found);
    match ctx.client.get_file_metadata(owning_system, &path) {
        Ok(_) => {}
        Err(StorageError::NotListable { .. }) => {
            info!(asset_id = asset.id, system = %owning_system, %path, "indexed source vanished before confirmation");
            return Ok(false);
        }
        Err(err) => return Err(err),
    }

    asset.set_original(Some(owning_system.to_string()), Some(path));
    Ok(true)
}

fn recover_origin_system<T: LocationTrackable + ?Sized>(
    item: &mut T,
    ctx: &BackfillContext<'_>,
) -> Result<bool, StorageError> {
    if item.original_system().is_some() {
        return Ok(false);
    }
    let Some(path) = item.original_path().map(ToOwned::to_owned) else {
        return Ok(false);
    };
    let Some(owning_system) = ctx.owning_system() else {
        return Ok(false);
    };

    match ctx.client.list(owning_system, &path) {
        Ok(listing) if !listing.is_empty() => {
            item.set_original(Some(owning_system.to_string()), Some(path));
            Ok(true)
        }
        Ok(_) | Err(StorageError::NotListable { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Legacy rows predate current-location tracking. The original location
/// is the only confirmed one, so it is copied over as a complete pair.
fn fill_current_from_origin<T: LocationTrackable + ?Sized>(item: &mut T) -> bool {
    let location = item.location_mut();
    match (
        location.current_system.is_some(),
        location.current_path.is_some(),
    ) {
        (true, true) => false,
        (false, false) => {
            let (Some(system), Some(path)) = (&location.original_system, &location.original_path)
            else {
                return false;
            };
            location.current_system = Some(system.clone());
            location.current_path = Some(path.clone());
            true
        }
        (false, true) => {
            if location.current_path != location.original_path || location.original_system.is_none()
            {
                return false;
            }
            location.current_system = location.original_system.clone();
            true
        }
        (true, false) => {
            if location.current_system != location.original_system || location.original_path.is_none()
            {
                return false;
            }
            location.current_path = location.original_path.clone();
            true
        }
    }
}
