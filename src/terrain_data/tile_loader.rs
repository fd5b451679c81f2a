use crate::{
    engine::context::EngineContext,
    geometry_pool::MeshKey,
    terrain_data::{
        coordinates::TileKey,
        tile_node::{TileContent, TileNode},
    },
};
use anyhow::{anyhow, Result};
use async_channel::{Receiver, Sender};
use bevy::{
    prelude::*,
    tasks::{AsyncComputeTaskPool, TaskPool},
};
use slab::Slab;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

/// A finished tile build, ready for attachment by the engine.
pub struct BuiltTile {
    pub node: TileNode,
    pub build_time: Duration,
}

/// The asynchronous loader collaborator: accepts build requests for a key
/// plus engine context, performs them off the main thread, and hands the
/// completed nodes back for attachment.
pub trait TileLoader: Send + Sync {
    /// Enqueues a build. Returns `false` when the key is already in flight.
    fn request_build(&self, key: TileKey, context: &Arc<EngineContext>) -> bool;

    /// Whether the loader can accept and complete requests.
    fn is_ready(&self) -> bool;

    /// Hands back every build completed since the last call.
    fn take_built(&self) -> Vec<BuiltTile>;

    fn in_flight(&self) -> usize;
}

struct InFlight {
    slots: Slab<TileKey>,
    keys: HashMap<TileKey, usize>,
}

/// The default loader: builds run as compute-pool tasks, each against the
/// requesting thread's engine context, and come home over a channel drained
/// once per frame.
pub struct AsyncTileLoader {
    results: Receiver<(TileKey, Result<BuiltTile>)>,
    sender: Sender<(TileKey, Result<BuiltTile>)>,
    in_flight: Mutex<InFlight>,
}

impl Default for AsyncTileLoader {
    fn default() -> Self {
        AsyncComputeTaskPool::get_or_init(TaskPool::new);

        let (sender, results) = async_channel::unbounded();
        Self {
            results,
            sender,
            in_flight: Mutex::new(InFlight {
                slots: Slab::with_capacity(16),
                keys: HashMap::new(),
            }),
        }
    }
}

impl AsyncTileLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TileLoader for AsyncTileLoader {
    fn request_build(&self, key: TileKey, context: &Arc<EngineContext>) -> bool {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.keys.contains_key(&key) {
                return false;
            }
            let slot = in_flight.slots.insert(key);
            in_flight.keys.insert(key, slot);
        }

        let context = context.clone();
        let sender = self.sender.clone();
        AsyncComputeTaskPool::get()
            .spawn(async move {
                context.sync_frame();
                let result = build_tile(key, &context);
                let _ = sender.send((key, result)).await;
            })
            .detach();

        true
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn take_built(&self) -> Vec<BuiltTile> {
        let mut built = Vec::new();
        while let Ok((key, result)) = self.results.try_recv() {
            let mut in_flight = self.in_flight.lock().unwrap();
            if let Some(slot) = in_flight.keys.remove(&key) {
                in_flight.slots.remove(slot);
            }
            drop(in_flight);

            match result {
                Ok(tile) => built.push(tile),
                Err(err) => warn!("tile build for {key} failed: {err:#}"),
            }
        }
        built
    }

    fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().keys.len()
    }
}

/// Materializes one tile against the context's current map frame. Builds
/// that race a newer revision simply come out stale and are reconciled (or
/// re-marked dirty) at attachment.
pub(crate) fn build_tile(key: TileKey, context: &EngineContext) -> Result<BuiltTile> {
    let start = Instant::now();
    let frame = context.frame();
    let profile = frame
        .profile
        .ok_or_else(|| anyhow!("map has no profile"))?;
    let extent = profile.key_extent(key);

    let mesh = context.geometry_pool.as_ref().map(|pool| {
        pool.acquire(MeshKey {
            tile_size: context.options.tile_size,
            optimize_orientation: context.optimize_triangle_orientation,
        })
    });

    let elevation = match &context.source {
        Some(source) => match source.load_elevation(key) {
            Ok(grid) => Some(grid),
            Err(err) => {
                // a tile without elevation still renders, just flat
                debug!("no elevation for {key}: {err:#}");
                None
            }
        },
        None => None,
    };

    Ok(BuiltTile {
        node: TileNode::new(key, extent, frame.revision, TileContent { mesh, elevation }),
        build_time: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::directory::EngineUid,
        geometry_pool::GeometryPool,
        map::{Map, MapFrame},
        options::TerrainOptions,
        render::bindings::RenderBindings,
        terrain_data::{coordinates::Profile, tile_registry::TileNodeRegistry},
    };
    use std::{sync::RwLock, thread, time::Duration};

    fn context(map: Arc<Map>) -> Arc<EngineContext> {
        Arc::new(EngineContext::new(
            EngineUid::next(),
            MapFrame::new(map),
            Some(Arc::new(GeometryPool::new())),
            Arc::new(AsyncTileLoader::new()),
            Arc::new(TileNodeRegistry::live("live")),
            None,
            Arc::new(RwLock::new(RenderBindings::default())),
            TerrainOptions::default(),
            None,
            true,
        ))
    }

    #[test]
    fn requests_complete_and_come_home_once() {
        let loader = AsyncTileLoader::new();
        let map = Arc::new(Map::with_profile(Profile::global_geodetic()));
        let context = context(map);
        let key = TileKey::new(1, 1, 0);

        assert!(loader.request_build(key, &context));
        // a key already in flight is refused
        assert!(!loader.request_build(key, &context));
        assert_eq!(loader.in_flight(), 1);

        let mut built = Vec::new();
        for _ in 0..500 {
            built.extend(loader.take_built());
            if !built.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(built.len(), 1);
        let node = &built[0].node;
        assert_eq!(node.key(), key);
        assert!(node.content().mesh.is_some());
        assert_eq!(loader.in_flight(), 0);

        // once home, the key may be requested again
        assert!(loader.request_build(key, &context));
    }

    #[test]
    fn builds_are_stamped_with_the_frame_revision() {
        let map = Arc::new(Map::with_profile(Profile::global_geodetic()));
        let context = context(map.clone());

        let built = build_tile(TileKey::new(0, 0, 0), &context).unwrap();
        assert_eq!(built.node.created_revision(), map.revision());

        let extent = built.node.extent();
        assert_eq!(
            extent,
            Profile::global_geodetic().key_extent(TileKey::new(0, 0, 0))
        );
    }

    #[test]
    fn building_without_a_profile_fails() {
        let context = context(Arc::new(Map::new()));
        assert!(build_tile(TileKey::new(0, 0, 0), &context).is_err());
    }
}
