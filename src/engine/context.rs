use crate::{
    engine::directory::EngineUid,
    geometry_pool::GeometryPool,
    map::{FrameState, MapFrame},
    options::TerrainOptions,
    render::bindings::RenderBindings,
    terrain_data::{
        tile_loader::TileLoader, tile_registry::TileNodeRegistry, tile_source::TileSource,
    },
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
    thread::{self, ThreadId},
};

/// Everything a worker thread needs to materialize a tile, bundled once per
/// thread: the thread's own map frame plus shared handles to the pool, the
/// loader, the registries, the bindings and the options.
///
/// Immutable after construction, except for the explicit
/// [`sync_frame`](Self::sync_frame) that copies the map frame forward at
/// the start of a build.
pub struct EngineContext {
    pub engine_uid: EngineUid,
    frame: MapFrame,
    pub geometry_pool: Option<Arc<GeometryPool>>,
    pub loader: Arc<dyn TileLoader>,
    pub live: Arc<TileNodeRegistry>,
    pub dead: Option<Arc<TileNodeRegistry>>,
    pub bindings: Arc<RwLock<RenderBindings>>,
    pub options: TerrainOptions,
    pub source: Option<Arc<dyn TileSource>>,
    pub optimize_triangle_orientation: bool,
}

impl EngineContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine_uid: EngineUid,
        frame: MapFrame,
        geometry_pool: Option<Arc<GeometryPool>>,
        loader: Arc<dyn TileLoader>,
        live: Arc<TileNodeRegistry>,
        dead: Option<Arc<TileNodeRegistry>>,
        bindings: Arc<RwLock<RenderBindings>>,
        options: TerrainOptions,
        source: Option<Arc<dyn TileSource>>,
        optimize_triangle_orientation: bool,
    ) -> Self {
        Self {
            engine_uid,
            frame,
            geometry_pool,
            loader,
            live,
            dead,
            bindings,
            options,
            source,
            optimize_triangle_orientation,
        }
    }

    pub fn frame(&self) -> FrameState {
        self.frame.read()
    }

    pub fn revision(&self) -> u64 {
        self.frame.revision()
    }

    /// Copies this context's map frame forward to the latest revision.
    pub fn sync_frame(&self) -> bool {
        self.frame.sync()
    }
}

/// The per-thread context slots of one engine: an explicit map from worker
/// thread identity to context, filled lazily under a short check-then-create
/// lock. Each thread gets its own instance, so build scratch state never
/// contends across workers.
#[derive(Default)]
pub(crate) struct ContextCache {
    slots: Mutex<HashMap<ThreadId, Arc<EngineContext>>>,
}

impl ContextCache {
    pub(crate) fn get_or_create(
        &self,
        create: impl FnOnce() -> EngineContext,
    ) -> Arc<EngineContext> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(thread::current().id())
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{map::Map, terrain_data::tile_loader::AsyncTileLoader};

    fn context() -> EngineContext {
        EngineContext::new(
            EngineUid::next(),
            MapFrame::new(Arc::new(Map::new())),
            None,
            Arc::new(AsyncTileLoader::new()),
            Arc::new(TileNodeRegistry::live("live")),
            None,
            Arc::new(RwLock::new(RenderBindings::default())),
            TerrainOptions::default(),
            None,
            true,
        )
    }

    #[test]
    fn one_context_per_thread() {
        let cache = Arc::new(ContextCache::default());

        let local_a = cache.get_or_create(context);
        let local_b = cache.get_or_create(|| unreachable!("slot is already filled"));
        assert!(Arc::ptr_eq(&local_a, &local_b));

        let remote = {
            let cache = cache.clone();
            std::thread::spawn(move || cache.get_or_create(context))
                .join()
                .unwrap()
        };

        assert!(!Arc::ptr_eq(&local_a, &remote));
        assert_eq!(cache.len(), 2);
    }
}
