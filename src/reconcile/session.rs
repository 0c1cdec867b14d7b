use crate::reconcile::model::{FeatureAsset, FileLocation, ItemKind, LocationTrackable, TileServer};
use crate::reconcile::store::{Database, Store};
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::debug;

/// Unit of work over the store. Reads come from a lazily loaded snapshot
/// (the identity map); staged location changes are written together on
/// `commit`.
pub struct Session<'s> {
    store: &'s Store,
    loaded: Option<Database>,
    pending: BTreeMap<(ItemKind, i64), FileLocation>,
}

impl<'s> Session<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self {
            store,
            loaded: None,
            pending: BTreeMap::new(),
        }
    }

    fn db(&mut self) -> Result<&Database> {
        let db = match self.loaded.take() {
            Some(db) => db,
            None => self.store.snapshot()?,
        };
        let db: &Database = self.loaded.insert(db);
        Ok(db)
    }

    pub fn asset(&mut self, id: i64) -> Result<Option<FeatureAsset>> {
        Ok(self.db()?.assets.get(&id).cloned())
    }

    pub fn tile_server(&mut self, id: i64) -> Result<Option<TileServer>> {
        Ok(self.db()?.tile_servers.get(&id).cloned())
    }

    /// Queue the item's location fields for the next commit.
    pub fn stage<T: LocationTrackable + ?Sized>(&mut self, item: &T) {
        self.pending
            .insert((item.kind(), item.id()), item.location().clone());
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn rollback(&mut self) {
        self.pending.clear();
    }

    /// Drop the identity map so the next read sees the store as it is now.
    pub fn expire_all(&mut self) {
        self.loaded = None;
    }

    /// Write every staged change in one store transaction. Rows deleted
    /// since they were read are skipped.
    pub fn commit(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let pending = std::mem::take(&mut self.pending);
        let written = self.store.transaction(|db| {
            let mut written = 0usize;
            for ((kind, id), location) in &pending {
                let row = match kind {
                    ItemKind::Asset => db.assets.get_mut(id).map(|a| &mut a.location),
                    ItemKind::TileServer => db.tile_servers.get_mut(id).map(|t| &mut t.location),
                };
                if let Some(row) = row {
                    *row = location.clone();
                    written += 1;
                }
            }
            Ok(written)
        })?;

        if let Some(db) = self.loaded.as_mut() {
            for ((kind, id), location) in pending {
                let row = match kind {
                    ItemKind::Asset => db.assets.get_mut(&id).map(|a| &mut a.location),
                    ItemKind::TileServer => db.tile_servers.get_mut(&id).map(|t| &mut t.location),
                };
                if let Some(row) = row {
                    *row = location;
                }
            }
        }
        debug!(written, "committed staged locations");
        Ok(written)
    }
}
