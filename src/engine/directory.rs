use crate::{
    geometry_pool::GeometryPool,
    terrain_data::{tile_loader::TileLoader, tile_registry::TileNodeRegistry},
};
use bevy::prelude::*;
use derive_more::Display;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock, Weak,
    },
};

/// Unique identifier of an engine instance within the process.
#[derive(Copy, Clone, Debug, Display, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EngineUid(u64);

impl EngineUid {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The part of an engine that outlives a single call stack: what a paging
/// or loader callback on an arbitrary thread needs to reach.
pub struct EngineShared {
    pub uid: EngineUid,
    pub live: Arc<TileNodeRegistry>,
    pub dead: Option<Arc<TileNodeRegistry>>,
    pub loader: Arc<dyn TileLoader>,
    pub geometry_pool: Option<Arc<GeometryPool>>,
}

/// The process-scoped directory of engines, for lookup by uid from
/// arbitrary threads.
///
/// Entries are weak: looking one up upgrades to a strong reference under
/// the directory lock, so a background thread either gets a usable handle
/// or nothing — never a reference to a destroyed engine.
#[derive(Default)]
pub struct EngineDirectory {
    entries: RwLock<HashMap<EngineUid, Weak<EngineShared>>>,
}

impl EngineDirectory {
    pub fn register(&self, shared: &Arc<EngineShared>) {
        self.entries
            .write()
            .unwrap()
            .insert(shared.uid, Arc::downgrade(shared));
        debug!("registered engine {}", shared.uid);
    }

    pub fn unregister(&self, uid: EngineUid) {
        if self.entries.write().unwrap().remove(&uid).is_some() {
            debug!("unregistered engine {uid}");
        }
    }

    pub fn get(&self, uid: EngineUid) -> Option<Arc<EngineShared>> {
        self.entries
            .read()
            .unwrap()
            .get(&uid)
            .and_then(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terrain_data::tile_loader::AsyncTileLoader;

    fn shared() -> Arc<EngineShared> {
        Arc::new(EngineShared {
            uid: EngineUid::next(),
            live: Arc::new(TileNodeRegistry::live("live")),
            dead: None,
            loader: Arc::new(AsyncTileLoader::new()),
            geometry_pool: None,
        })
    }

    #[test]
    fn lookup_returns_a_strong_reference_while_alive() {
        let directory = EngineDirectory::default();
        let engine = shared();
        directory.register(&engine);

        let looked_up = directory.get(engine.uid).unwrap();
        assert_eq!(looked_up.uid, engine.uid);
    }

    #[test]
    fn lookup_after_destruction_returns_nothing() {
        let directory = EngineDirectory::default();
        let engine = shared();
        let uid = engine.uid;
        directory.register(&engine);

        drop(engine);
        assert!(directory.get(uid).is_none());

        directory.unregister(uid);
        assert!(directory.is_empty());
    }
}
