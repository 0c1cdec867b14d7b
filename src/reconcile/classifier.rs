use crate::reconcile::cache::{ExternalIdCache, PublishedIndexCache};
use crate::reconcile::config::EngineConfig;
use crate::reconcile::external_id::project_id_for_system;
use crate::reconcile::file_index::{FileIndex, build_index};
use crate::reconcile::model::LocationTrackable;
use crate::reconcile::resolver::resolve;
use crate::reconcile::util::absolute_remote_path;
use crate::storage::{RemoteStorage, StorageError};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Already on a public system; nothing to look up.
    Public,
    /// Found in the published copy of its project and moved there.
    Relocated { system: String, path: String },
    NotPublic,
    /// No current system to reason about; the stored verdict is kept.
    Unknown,
}

pub struct Classifier<'a> {
    client: &'a dyn RemoteStorage,
    engine: &'a EngineConfig,
}

impl<'a> Classifier<'a> {
    pub fn new(client: &'a dyn RemoteStorage, engine: &'a EngineConfig) -> Self {
        Self { client, engine }
    }

    fn published_index(
        &self,
        system: &str,
        external_ids: &mut ExternalIdCache,
    ) -> Result<Option<FileIndex>, StorageError> {
        if self.engine.project_uuid(system).is_none() {
            info!(%system, "not a project system; no published copy to search");
            return Ok(None);
        }
        let Some(external_id) = project_id_for_system(self.client, self.engine, external_ids, system)?
        else {
            info!(%system, "no external project id; no published copy to search");
            return Ok(None);
        };

        let root = self.engine.published_root(&external_id);
        info!(%system, %external_id, published_root = %root, "indexing published copy");
        Ok(Some(build_index(
            self.client,
            self.engine,
            &self.engine.published_system,
            &root,
        )))
    }

    /// Decide whether the item's file is publicly reachable, moving its
    /// current location into the published area when a copy is found there.
    pub fn classify<T: LocationTrackable + ?Sized>(
        &self,
        item: &mut T,
        published: &mut PublishedIndexCache,
        external_ids: &mut ExternalIdCache,
    ) -> Result<Verdict, StorageError> {
        let Some(system) = item.current_system().map(ToOwned::to_owned) else {
            debug!(kind = %item.kind(), id = item.id(), "no current system; verdict unchanged");
            return Ok(Verdict::Unknown);
        };

        if self.engine.is_public_system(&system) {
            item.set_public(true);
            return Ok(Verdict::Public);
        }

        let index =
            published.get_or_build(&system, || self.published_index(&system, external_ids))?;
        let resolution = match index {
            Some(index) => item.current_path().map(|path| resolve(index, path)),
            None => None,
        };

        let Some(found) = resolution.filter(|r| r.found).and_then(|r| r.path) else {
            item.set_public(false);
            return Ok(Verdict::NotPublic);
        };

        let new_system = self.engine.published_system.clone();
        let new_path = absolute_remote_path(&found);
        debug!(
            kind = %item.kind(),
            id = item.id(),
            from = %system,
            to = %new_path,
            "file found in published copy"
        );
        item.set_current(Some(new_system.clone()), Some(new_path.clone()));
        item.set_public(true);
        Ok(Verdict::Relocated {
            system: new_system,
            path: new_path,
        })
    }
}
