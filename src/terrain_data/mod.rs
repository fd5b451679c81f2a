//! The fundamental data structures of the terrain: tile identity
//! ([`TileKey`]), the tiling [`Profile`], resident tile content
//! ([`TileNode`]) and the [`TileNodeRegistry`] directory of everything
//! resident.
//!
//! # Explanation
//! The terrain is a quadtree of tiles, each identified by a [`TileKey`]
//! within the map's [`Profile`]. Tiles are owned by the spatial tree the
//! engine maintains; the live [`TileNodeRegistry`] is the identity-keyed
//! lookup over them that invalidation (`set_dirty`), revision tracking and
//! per-frame bookkeeping operate on. New and replacement tiles are produced
//! off the main thread through the [`TileLoader`] contract and reconciled
//! into the registry and tree on completion.

pub mod coordinates;
pub mod tile_loader;
pub mod tile_node;
pub mod tile_registry;
pub mod tile_source;

pub use coordinates::{Crs, GeoExtent, GeoRegion, Profile, TileKey};
pub use tile_loader::{AsyncTileLoader, BuiltTile, TileLoader};
pub use tile_node::{ElevationGrid, TileContent, TileFlags, TileNode};
pub use tile_registry::TileNodeRegistry;
pub use tile_source::{DiskTileSource, TileSource};
