use crate::{
    engine::{context::EngineContext, Traversal, TraversalKind},
    geometry_pool::TileMesh,
    terrain_data::coordinates::{GeoRegion, TileKey},
};
use bevy::prelude::*;
use bitflags::bitflags;
use ndarray::Array2;
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc, Mutex,
};

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct TileFlags: u32 {
        /// The tile was invalidated and must refresh before it is current.
        const DIRTY = 1 << 0;
        /// A replacement build is already in flight with the loader.
        const BUILD_REQUESTED = 1 << 1;
    }
}

/// A regular grid of elevation samples covering one tile.
pub struct ElevationGrid {
    data: Array2<f32>,
}

impl ElevationGrid {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// Nearest sample at normalized tile coordinates.
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        let x = ((u.clamp(0.0, 1.0) * (self.width() - 1) as f32).round()) as usize;
        let y = ((v.clamp(0.0, 1.0) * (self.height() - 1) as f32).round()) as usize;
        self.data[(y, x)]
    }
}

/// What a resident tile holds on to: its shared grid mesh and, when an
/// elevation source contributed, its elevation samples.
#[derive(Default)]
pub struct TileContent {
    pub mesh: Option<Arc<TileMesh>>,
    pub elevation: Option<ElevationGrid>,
}

/// One quadtree cell's renderable content.
///
/// Nodes are owned by the spatial tree (the engine's root set and parent
/// nodes); the live registry only looks them up through weak handles, and
/// the dead registry owns them while their GPU objects await release.
pub struct TileNode {
    key: TileKey,
    extent: GeoRegion,
    created_revision: u64,
    flags: AtomicU32,
    last_frame: AtomicU64,
    content: TileContent,
    children: Mutex<Vec<Arc<TileNode>>>,
}

impl TileNode {
    pub fn new(key: TileKey, extent: GeoRegion, created_revision: u64, content: TileContent) -> Self {
        Self {
            key,
            extent,
            created_revision,
            flags: AtomicU32::new(0),
            last_frame: AtomicU64::new(0),
            content,
            children: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn extent(&self) -> GeoRegion {
        self.extent
    }

    pub fn created_revision(&self) -> u64 {
        self.created_revision
    }

    pub fn content(&self) -> &TileContent {
        &self.content
    }

    fn set_flag(&self, flag: TileFlags, on: bool) {
        if on {
            self.flags.fetch_or(flag.bits(), Ordering::Relaxed);
        } else {
            self.flags.fetch_and(!flag.bits(), Ordering::Relaxed);
        }
    }

    fn has_flag(&self, flag: TileFlags) -> bool {
        TileFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed)).contains(flag)
    }

    pub fn mark_dirty(&self) {
        self.set_flag(TileFlags::DIRTY, true);
    }

    pub fn is_dirty(&self) -> bool {
        self.has_flag(TileFlags::DIRTY)
    }

    pub(crate) fn mark_build_requested(&self) {
        self.set_flag(TileFlags::BUILD_REQUESTED, true);
    }

    pub fn is_build_requested(&self) -> bool {
        self.has_flag(TileFlags::BUILD_REQUESTED)
    }

    /// Whether the tile still matches the published registry revision.
    pub fn is_stale(&self, registry_revision: u64) -> bool {
        self.is_dirty() || self.created_revision < registry_revision
    }

    pub fn stamp_frame(&self, frame: u64) {
        self.last_frame.store(frame, Ordering::Relaxed);
    }

    pub fn last_frame(&self) -> u64 {
        self.last_frame.load(Ordering::Relaxed)
    }

    pub fn children(&self) -> Vec<Arc<TileNode>> {
        self.children.lock().unwrap().clone()
    }

    pub fn add_child(&self, child: Arc<TileNode>) {
        self.children.lock().unwrap().push(child);
    }

    /// Swaps in a rebuilt node for the same key. Returns the replaced node.
    pub fn replace_child(&self, child: Arc<TileNode>) -> Option<Arc<TileNode>> {
        let mut children = self.children.lock().unwrap();
        if let Some(slot) = children.iter_mut().find(|c| c.key() == child.key()) {
            Some(std::mem::replace(slot, child))
        } else {
            children.push(child);
            None
        }
    }

    /// The traversal hook tiles cooperate with: stamp the frame, and during
    /// an update pass hand a rebuild request to the loader if the tile no
    /// longer matches the published revision.
    pub fn accept(&self, traversal: &Traversal, context: Option<&Arc<EngineContext>>) {
        self.stamp_frame(traversal.frame);

        if let Some(context) = context {
            // the loader refuses keys already in flight, so re-requesting a
            // still-stale tile every pass is cheap and retries failed builds
            if traversal.kind == TraversalKind::Update
                && self.is_stale(context.live.map_revision())
                && context.loader.request_build(self.key, context)
            {
                self.mark_build_requested();
                debug!("requested rebuild of stale tile {}", self.key);
            }
        }

        for child in self.children() {
            child.accept(traversal, context);
        }
    }
}
