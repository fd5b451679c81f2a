use bevy::math::{DVec2, UVec2};
use itertools::Itertools;
use std::{fmt, str::FromStr};

/// A coordinate reference system, described by its name and world bounds.
///
/// Reprojection between systems maps extents linearly through normalized
/// coordinates; anything beyond that (datum shifts, curved projections) is
/// the map model's concern, not this core's.
#[derive(Clone, Debug, PartialEq)]
pub struct Crs {
    name: String,
    bounds: GeoRegion,
}

impl Crs {
    pub fn new(name: impl Into<String>, bounds: GeoRegion) -> Self {
        Self {
            name: name.into(),
            bounds,
        }
    }

    /// Plate carrée degrees, the usual geodetic tiling reference.
    pub fn geodetic() -> Self {
        Self::new(
            "wgs84",
            GeoRegion::new(DVec2::new(-180.0, -90.0), DVec2::new(180.0, 90.0)),
        )
    }

    /// Spherical mercator meters.
    pub fn spherical_mercator() -> Self {
        const EXTENT: f64 = 20037508.342789244;
        Self::new(
            "spherical-mercator",
            GeoRegion::new(DVec2::splat(-EXTENT), DVec2::splat(EXTENT)),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> GeoRegion {
        self.bounds
    }

    pub fn is_equivalent_to(&self, other: &Crs) -> bool {
        self.name == other.name
    }
}

/// An axis-aligned region in some coordinate reference system.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct GeoRegion {
    pub min: DVec2,
    pub max: DVec2,
}

impl GeoRegion {
    pub fn new(min: DVec2, max: DVec2) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> DVec2 {
        self.max - self.min
    }

    pub fn intersects(&self, other: &GeoRegion) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }

    pub fn contains(&self, point: DVec2) -> bool {
        point.x >= self.min.x && point.x < self.max.x && point.y >= self.min.y && point.y < self.max.y
    }
}

/// A region paired with the reference system it is expressed in.
///
/// Regions handed in from outside may lack a usable reference system; those
/// are rejected by reprojection instead of being interpreted blindly.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoExtent {
    pub crs: Option<Crs>,
    pub region: GeoRegion,
}

impl GeoExtent {
    pub fn new(crs: Crs, region: GeoRegion) -> Self {
        Self {
            crs: Some(crs),
            region,
        }
    }
}

/// The tiling scheme of the terrain: a reference system, the covered extent
/// and the root tile grid, from which every [`TileKey`]'s extent follows.
#[derive(Clone, Debug, PartialEq)]
pub struct Profile {
    crs: Crs,
    extent: GeoRegion,
    root_tiles: UVec2,
}

impl Profile {
    pub fn new(crs: Crs, extent: GeoRegion, root_tiles: UVec2) -> Self {
        debug_assert!(root_tiles.x > 0 && root_tiles.y > 0);
        Self {
            crs,
            extent,
            root_tiles,
        }
    }

    /// The standard global geodetic profile with a 2x1 root grid.
    pub fn global_geodetic() -> Self {
        let crs = Crs::geodetic();
        let extent = crs.bounds();
        Self::new(crs, extent, UVec2::new(2, 1))
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn extent(&self) -> GeoRegion {
        self.extent
    }

    /// Tile grid dimensions at the given level of detail.
    pub fn tiles_at_lod(&self, lod: u32) -> UVec2 {
        UVec2::new(self.root_tiles.x << lod, self.root_tiles.y << lod)
    }

    /// All keys of one level, row-major.
    pub fn keys_at_lod(&self, lod: u32) -> Vec<TileKey> {
        let tiles = self.tiles_at_lod(lod);
        (0..tiles.y)
            .cartesian_product(0..tiles.x)
            .map(|(y, x)| TileKey::new(lod, x, y))
            .collect_vec()
    }

    pub fn key_extent(&self, key: TileKey) -> GeoRegion {
        let tiles = self.tiles_at_lod(key.lod).as_dvec2();
        let size = self.extent.size() / tiles;
        // y grows downward in key space, like tile pyramids on disk
        let min = DVec2::new(
            self.extent.min.x + size.x * key.x as f64,
            self.extent.max.y - size.y * (key.y + 1) as f64,
        );
        GeoRegion::new(min, min + size)
    }

    /// Brings an external extent into this profile's reference system.
    ///
    /// Returns `None` if the extent does not declare a reference system;
    /// callers must treat that as a contract violation, not a miss.
    pub fn reproject(&self, extent: &GeoExtent) -> Option<GeoRegion> {
        let crs = extent.crs.as_ref()?;
        if crs.is_equivalent_to(&self.crs) {
            return Some(extent.region);
        }

        let from = crs.bounds();
        let to = self.crs.bounds();
        let normalize = |p: DVec2| (p - from.min) / from.size();
        let denormalize = |p: DVec2| to.min + p * to.size();
        Some(GeoRegion::new(
            denormalize(normalize(extent.region.min)),
            denormalize(normalize(extent.region.max)),
        ))
    }
}

/// The identity of a quadtree cell: level of detail and grid position.
#[derive(Copy, Clone, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct TileKey {
    pub lod: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub const INVALID: TileKey = TileKey {
        lod: u32::MAX,
        x: u32::MAX,
        y: u32::MAX,
    };

    pub fn new(lod: u32, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// The containing key one level coarser, or `INVALID` at the root level.
    pub fn parent(self) -> Self {
        if self.lod == 0 {
            return Self::INVALID;
        }
        Self {
            lod: self.lod - 1,
            x: self.x >> 1,
            y: self.y >> 1,
        }
    }

    /// One of the four children, `quadrant` in `0..4` (row-major).
    pub fn child(self, quadrant: u32) -> Self {
        debug_assert!(quadrant < 4);
        Self {
            lod: self.lod + 1,
            x: (self.x << 1) + (quadrant & 1),
            y: (self.y << 1) + (quadrant >> 1),
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{}_{}_{}", self.lod, self.x, self.y)
    }
}

impl FromStr for TileKey {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_');
        let mut next = || parts.next().unwrap_or("").parse();

        Ok(Self {
            lod: next()?,
            x: next()?,
            y: next()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_text_round_trip() {
        let key = TileKey::new(3, 5, 2);
        assert_eq!(key.to_string(), "3_5_2");
        assert_eq!("3_5_2".parse::<TileKey>().unwrap(), key);
        assert!("3_x_2".parse::<TileKey>().is_err());
    }

    #[test]
    fn child_and_parent_are_inverse() {
        let key = TileKey::new(4, 9, 6);
        for quadrant in 0..4 {
            assert_eq!(key.child(quadrant).parent(), key);
        }
        assert_eq!(TileKey::new(0, 0, 0).parent(), TileKey::INVALID);
    }

    #[test]
    fn root_key_count_follows_the_root_grid() {
        let profile = Profile::new(
            Crs::geodetic(),
            Crs::geodetic().bounds(),
            UVec2::new(3, 3),
        );
        assert_eq!(profile.keys_at_lod(0).len(), 9);
        assert_eq!(profile.keys_at_lod(1).len(), 36);

        let global = Profile::global_geodetic();
        assert_eq!(global.keys_at_lod(0).len(), 2);
    }

    #[test]
    fn key_extents_tile_the_profile() {
        let profile = Profile::global_geodetic();
        let left = profile.key_extent(TileKey::new(0, 0, 0));
        let right = profile.key_extent(TileKey::new(0, 1, 0));

        assert_eq!(left.min, DVec2::new(-180.0, -90.0));
        assert_eq!(left.max, DVec2::new(0.0, 90.0));
        assert_eq!(right.min.x, 0.0);
        assert!(!left.intersects(&right));
    }

    #[test]
    fn reprojection_requires_a_reference_system() {
        let profile = Profile::global_geodetic();
        let region = GeoRegion::new(DVec2::new(0.0, 0.0), DVec2::new(10.0, 10.0));

        assert!(profile
            .reproject(&GeoExtent {
                crs: None,
                region,
            })
            .is_none());

        let same = profile
            .reproject(&GeoExtent::new(Crs::geodetic(), region))
            .unwrap();
        assert_eq!(same, region);
    }

    #[test]
    fn reprojection_is_linear_in_normalized_coordinates() {
        let profile = Profile::global_geodetic();
        let mercator = Crs::spherical_mercator();
        let full = profile
            .reproject(&GeoExtent::new(mercator.clone(), mercator.bounds()))
            .unwrap();

        assert_eq!(full, Crs::geodetic().bounds());
    }
}
