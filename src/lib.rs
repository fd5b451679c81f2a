//! This crate provides the core of a map-driven terrain renderer: a
//! dynamically evolving quadtree of terrain tiles over a layered map model,
//! streamed asynchronously and drawn through engine-managed GPU state.
//!
//! # Background
//! There are three problems every streaming terrain engine has to solve:
//!
//! ## How to keep the resident tile set consistent?
//! Tiles are identified by a [`TileKey`](terrain_data::TileKey) within the
//! map's tiling [`Profile`](terrain_data::Profile) and owned by the spatial
//! tree the engine maintains. The
//! [`TileNodeRegistry`](terrain_data::TileNodeRegistry) is the identity-keyed
//! directory over them: at most one resident node per key, revision-stamped
//! against the map model, with region/level-ranged invalidation that tiles
//! observe cooperatively. Builds finish off-thread and are reconciled on
//! attachment, so a build that lost its race is simply discarded.
//!
//! ## How to follow the map model?
//! The [`Map`](map::Map) is a revisioned stack of image and elevation
//! layers. Every mutation produces a [`MapChange`](map::MapChange) the
//! [`TerrainEngineNode`](engine::TerrainEngineNode) dispatches over
//! exhaustively; batched changes coalesce into at most one terrain rebuild
//! and one render-state rebuild at batch end.
//!
//! ## How to manage the GPU-facing state?
//! Texture image units come from an engine-wide pool and are published as
//! sampler bindings; render bins order the drawables; and
//! [`update_state`](engine::TerrainEngineNode::update_state) assembles the
//! shader program graph, including a generated per-layer color filter
//! dispatch, into plain state sets the render integration consumes.

pub mod engine;
pub mod geometry_pool;
pub mod map;
pub mod options;
pub mod plugin;
pub mod render;
pub mod terrain_data;

#[allow(missing_docs)]
pub mod prelude {
    #[doc(hidden)]
    pub use crate::{
        engine::{
            EngineContext, EngineDirectory, EngineShared, EngineUid, TerrainEngineNode,
            Traversal, TraversalKind,
        },
        geometry_pool::GeometryPool,
        map::{ColorFilter, ElevationLayer, ImageLayer, LayerUid, Map, MapChange, MapFrame},
        options::{Capabilities, ElevationInterpolation, TerrainOptions},
        plugin::{MapChangeEvent, SharedEngineDirectory, SharedRenderBinRegistry, TerrainEnginePlugin},
        render::{
            BinSortMode, RenderBinPrototype, RenderBinRegistry, RenderStateSet, SamplerBinding,
            TextureUnitPool,
        },
        terrain_data::{
            AsyncTileLoader, Crs, DiskTileSource, GeoExtent, GeoRegion, Profile, TileKey,
            TileLoader, TileNode, TileNodeRegistry, TileSource,
        },
    };
}
