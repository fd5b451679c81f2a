use bevy::prelude::*;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Setting this environment variable disables the shared geometry pool, so
/// every tile build creates its own mesh. Diagnostic use only.
pub const NO_POOL_ENV: &str = "BEVY_MAP_TERRAIN_NO_POOL";

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct MeshKey {
    pub tile_size: u32,
    pub optimize_orientation: bool,
}

/// The unit-square grid mesh shared by all tiles of one configuration.
/// Heights are applied per tile in the shaders, so one grid serves every key.
pub struct TileMesh {
    pub tile_size: u32,
    pub positions: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl TileMesh {
    fn grid(tile_size: u32, optimize_orientation: bool) -> Self {
        let verts = tile_size + 1;
        let step = 1.0 / tile_size as f32;

        let mut positions = Vec::with_capacity((verts * verts) as usize);
        let mut uvs = Vec::with_capacity((verts * verts) as usize);
        for y in 0..verts {
            for x in 0..verts {
                let u = x as f32 * step;
                let v = y as f32 * step;
                positions.push([u, 0.0, v]);
                uvs.push([u, v]);
            }
        }

        let mut indices = Vec::with_capacity((tile_size * tile_size * 6) as usize);
        for y in 0..tile_size {
            for x in 0..tile_size {
                let a = y * verts + x;
                let b = a + 1;
                let c = a + verts;
                let d = c + 1;

                // alternate the quad diagonal in a checkerboard, so long
                // triangles do not line up across the whole tile
                if optimize_orientation && (x + y) % 2 == 1 {
                    indices.extend([a, c, b, b, c, d]);
                } else {
                    indices.extend([a, c, d, a, d, b]);
                }
            }
        }

        Self {
            tile_size,
            positions,
            uvs,
            indices,
        }
    }

    pub fn position_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Shares tile grid meshes between all tiles of an engine, keyed by grid
/// configuration. Worker threads hit the pool concurrently during builds.
#[derive(Default)]
pub struct GeometryPool {
    meshes: Mutex<HashMap<MeshKey, Arc<TileMesh>>>,
}

impl GeometryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, key: MeshKey) -> Arc<TileMesh> {
        let mut meshes = self.meshes.lock().unwrap();
        meshes
            .entry(key)
            .or_insert_with(|| {
                debug!(
                    "building pooled tile mesh, size {} (optimized: {})",
                    key.tile_size, key.optimize_orientation
                );
                Arc::new(TileMesh::grid(key.tile_size, key.optimize_orientation))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.meshes.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_share_one_mesh() {
        let pool = GeometryPool::new();
        let key = MeshKey {
            tile_size: 16,
            optimize_orientation: true,
        };

        let a = pool.acquire(key);
        let b = pool.acquire(key);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);

        pool.acquire(MeshKey {
            tile_size: 16,
            optimize_orientation: false,
        });
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn grid_dimensions_match_the_tile_size() {
        let mesh = TileMesh::grid(4, false);
        assert_eq!(mesh.positions.len(), 25);
        assert_eq!(mesh.uvs.len(), 25);
        assert_eq!(mesh.indices.len(), 4 * 4 * 6);
        assert_eq!(mesh.position_bytes().len(), 25 * 12);
    }
}
