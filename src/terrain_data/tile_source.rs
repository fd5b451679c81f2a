use crate::terrain_data::{coordinates::TileKey, tile_node::ElevationGrid};
use anyhow::Result;
use ndarray::Array2;
use std::path::PathBuf;

/// Supplies per-tile elevation data to tile builds. Fetch scheduling and
/// caching live behind this seam, not in the engine.
pub trait TileSource: Send + Sync {
    fn load_elevation(&self, key: TileKey) -> Result<ElevationGrid>;
}

/// Reads 16 bit grayscale heightmap tiles from a `<lod>_<x>_<y>.png` pyramid
/// on disk.
pub struct DiskTileSource {
    path: PathBuf,
    height_scale: f32,
}

impl DiskTileSource {
    pub fn new(path: impl Into<PathBuf>, height_scale: f32) -> Self {
        Self {
            path: path.into(),
            height_scale,
        }
    }
}

impl TileSource for DiskTileSource {
    fn load_elevation(&self, key: TileKey) -> Result<ElevationGrid> {
        let path = self.path.join(format!("{key}.png"));

        let mut reader = image::ImageReader::open(&path)?;
        reader.no_limits();
        let image = reader.decode()?.into_luma16();

        let (width, height) = (image.width() as usize, image.height() as usize);
        let samples = image
            .into_raw()
            .into_iter()
            .map(|sample| sample as f32 / u16::MAX as f32 * self.height_scale)
            .collect();

        Ok(ElevationGrid::new(Array2::from_shape_vec(
            (height, width),
            samples,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};

    #[test]
    fn disk_source_decodes_heightmap_tiles() {
        let dir = std::env::temp_dir().join(format!("map_terrain_tiles_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let key = TileKey::new(2, 3, 1);
        let image = ImageBuffer::<Luma<u16>, Vec<u16>>::from_fn(4, 4, |x, y| {
            Luma([if (x, y) == (0, 0) { u16::MAX } else { 0 }])
        });
        image.save(dir.join(format!("{key}.png"))).unwrap();

        let source = DiskTileSource::new(dir.clone(), 100.0);
        let grid = source.load_elevation(key).unwrap();
        assert_eq!((grid.width(), grid.height()), (4, 4));
        assert_eq!(grid.sample(0.0, 0.0), 100.0);
        assert_eq!(grid.sample(1.0, 1.0), 0.0);

        // a tile that is not part of the pyramid is an error, not a panic
        assert!(source.load_elevation(TileKey::new(9, 0, 0)).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
