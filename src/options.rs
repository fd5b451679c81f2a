use anyhow::Result;
use serde::{Deserialize, Serialize};

/// How elevation samples are interpolated when a tile surface is built.
///
/// [`Triangulate`](Self::Triangulate) disables the triangle-orientation
/// optimization, since the triangulation itself dictates the diagonals.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElevationInterpolation {
    #[default]
    Bilinear,
    Nearest,
    Triangulate,
}

/// The configuration surface of the terrain engine.
///
/// All fields are defaulted, so partial RON configs are accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainOptions {
    /// Scale factor for the minimum visibility range of a tile.
    pub min_tile_range_factor: f32,
    /// Whether tiles blend between levels of detail.
    pub lod_blending: bool,
    pub lod_blend_delay: f32,
    pub lod_blend_duration: f32,
    /// The level of detail of the root tile set.
    pub first_lod: u32,
    /// Retire GPU-side tile objects through the dead registry instead of
    /// destroying them inside the frame path.
    pub quick_release_gpu_objects: bool,
    /// Render the terrain surface with GPU-side tessellation patches.
    pub gpu_tessellation: bool,
    /// Overrides the base color of the terrain surface.
    pub terrain_color: Option<[f32; 4]>,
    /// Enables generic blending of the terrain surface.
    pub enable_blending: bool,
    pub elevation_interpolation: ElevationInterpolation,
    /// Vertex count along one edge of a tile grid.
    pub tile_size: u32,
}

impl Default for TerrainOptions {
    fn default() -> Self {
        Self {
            min_tile_range_factor: 6.0,
            lod_blending: false,
            lod_blend_delay: 0.0,
            lod_blend_duration: 0.25,
            first_lod: 0,
            quick_release_gpu_objects: true,
            gpu_tessellation: false,
            terrain_color: None,
            enable_blending: false,
            elevation_interpolation: ElevationInterpolation::default(),
            tile_size: 17,
        }
    }
}

impl TerrainOptions {
    pub fn from_ron_str(source: &str) -> Result<Self> {
        Ok(ron::from_str(source)?)
    }
}

/// Description of the runtime the engine renders against.
#[derive(Clone, Debug, PartialEq)]
pub struct Capabilities {
    /// Whether the runtime can run the shader program graph at all.
    pub supports_shaders: bool,
    /// Size of the texture image unit pool shared by all bindings.
    pub max_texture_image_units: u32,
    /// Available multisample count, `0` or `1` meaning no multisampling.
    pub multisamples: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supports_shaders: true,
            max_texture_image_units: 16,
            multisamples: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_ron_config_uses_defaults() {
        let options =
            TerrainOptions::from_ron_str("(first_lod: 2, gpu_tessellation: true)").unwrap();

        assert_eq!(options.first_lod, 2);
        assert!(options.gpu_tessellation);
        assert_eq!(options.tile_size, TerrainOptions::default().tile_size);
        assert_eq!(
            options.elevation_interpolation,
            ElevationInterpolation::Bilinear
        );
    }

    #[test]
    fn invalid_ron_config_is_rejected() {
        assert!(TerrainOptions::from_ron_str("(first_lod: \"nope\")").is_err());
    }
}
