//! Tile grid coordinates and bounds.

use glam::Vec3;

/// Coordinate of a tile in the uniform tile grid.
///
/// The grid cell edge length in world units is `tile_size * cell_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared distance to another coordinate, in tiles.
    pub fn distance_sq(&self, other: TileCoord) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }
}

/// Axis-aligned box covered by one tile, including the global vertical extent.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct TileBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl TileBounds {
    /// Computes the bounds of `coord` in a grid anchored at `origin`.
    ///
    /// `tile_world_size` is the tile edge length in world units; `z_min` and
    /// `z_max` give the global vertical extent of the navigable space.
    pub fn of_tile(origin: Vec3, tile_world_size: f32, coord: TileCoord, z_min: f32, z_max: f32) -> Self {
        let min = Vec3::new(
            origin.x + coord.x as f32 * tile_world_size,
            origin.y + coord.y as f32 * tile_world_size,
            z_min,
        );
        let max = Vec3::new(
            min.x + tile_world_size,
            min.y + tile_world_size,
            z_max,
        );
        Self { min, max }
    }

    /// Expands the box horizontally by `margin` world units. The vertical
    /// extent is left untouched.
    pub fn expanded(&self, margin: f32) -> Self {
        Self {
            min: Vec3::new(self.min.x - margin, self.min.y - margin, self.min.z),
            max: Vec3::new(self.max.x + margin, self.max.y + margin, self.max.z),
        }
    }

    pub fn intersects(&self, other: &TileBounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains(&self, other: &TileBounds) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
    }
}

/// Computes the inclusive tile coordinate range touched by a world-space box.
pub fn tile_range_for_bounds(
    origin: Vec3,
    tile_world_size: f32,
    min: Vec3,
    max: Vec3,
) -> (TileCoord, TileCoord) {
    let lo = TileCoord::new(
        ((min.x - origin.x) / tile_world_size).floor() as i32,
        ((min.y - origin.y) / tile_world_size).floor() as i32,
    );
    let hi = TileCoord::new(
        ((max.x - origin.x) / tile_world_size).floor() as i32,
        ((max.y - origin.y) / tile_world_size).floor() as i32,
    );
    (lo, hi)
}
