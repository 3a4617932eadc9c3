//! Configuration for the tiled baking pipeline.
//!
//! An explicit value struct passed into the pipeline; there is no process
//! wide singleton.

use glam::Vec3;
use tilenav_common::{Error, Result};

/// Region partitioning strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub enum Partitioning {
    /// Single monotone sweep over the whole layer. Fast, lower quality.
    Monotone,
    /// Distance-field based watershed. Best region shapes.
    Watershed,
    /// Monotone sweep inside fixed-size chunks. Good locality.
    ChunkyMonotone,
}

/// Configuration parameters for tile baking.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshConfig {
    /// Grid origin; tile (0, 0) has its min corner here.
    pub origin: Vec3,
    /// Global vertical extent of navigable space.
    pub z_min: f32,
    pub z_max: f32,

    /// Horizontal voxel resolution in world units.
    pub cell_size: f32,
    /// Vertical voxel resolution in world units.
    pub cell_height: f32,
    /// Tile edge length in cells (excluding border).
    pub tile_size: i32,

    /// The maximum slope in degrees that is considered walkable.
    pub walkable_slope_deg: f32,
    /// Minimum clearance above a floor, in cells.
    pub walkable_height: i32,
    /// Maximum step height between spans, in cells.
    pub walkable_climb: i32,
    /// Agent radius, in cells. Walkable area is eroded inward by this much.
    pub walkable_radius: i32,

    /// Maximum contour edge length, in cells. Zero disables the limit.
    pub max_edge_len: i32,
    /// Maximum perpendicular deviation of simplified contours, in cells.
    pub max_simplification_error: f32,
    /// Regions smaller than this (in cells) are merged or discarded.
    pub min_region_area: i32,
    /// Regions may be merged while the combined size stays under this.
    pub merge_region_area: i32,
    /// Maximum vertices per polygon.
    pub max_verts_per_poly: i32,

    /// Sampling distance for the detail mesh, in world units. Zero disables
    /// the detail mesh.
    pub detail_sample_dist: f32,
    /// Maximum height deviation of the detail mesh, in world units.
    pub detail_sample_max_error: f32,

    /// Partitioning strategy used for region building.
    pub partitioning: Partitioning,
    /// When set, spans with insufficient headroom are kept and marked with
    /// the reserved low area id instead of being removed.
    pub mark_low_areas: bool,
}

impl Default for NavMeshConfig {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            z_min: -100.0,
            z_max: 100.0,
            cell_size: 0.3,
            cell_height: 0.2,
            tile_size: 64,
            walkable_slope_deg: 45.0,
            walkable_height: 10,
            walkable_climb: 2,
            walkable_radius: 2,
            max_edge_len: 24,
            max_simplification_error: 1.3,
            min_region_area: 8,
            merge_region_area: 20,
            max_verts_per_poly: 6,
            detail_sample_dist: 1.8,
            detail_sample_max_error: 0.2,
            partitioning: Partitioning::Watershed,
            mark_low_areas: false,
        }
    }
}

impl NavMeshConfig {
    /// Border around each tile, in cells. The margin avoids seam artifacts
    /// where erosion would otherwise see a false cliff at the tile edge.
    pub fn border_size(&self) -> i32 {
        self.walkable_radius + 3
    }

    /// Tile edge length in world units.
    pub fn tile_world_size(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// Grid width/height for one tile including the border, in cells.
    pub fn grid_size(&self) -> i32 {
        self.tile_size + self.border_size() * 2
    }

    /// Cosine of the walkable slope limit.
    pub fn walkable_slope_cos(&self) -> f32 {
        self.walkable_slope_deg.to_radians().cos()
    }

    pub fn validate(&self) -> Result<()> {
        if self.cell_size <= 0.0 || self.cell_height <= 0.0 {
            return Err(Error::InvalidData(
                "cell size and cell height must be positive".to_string(),
            ));
        }
        if self.tile_size <= 0 {
            return Err(Error::InvalidData("tile size must be positive".to_string()));
        }
        if !(0.0..=90.0).contains(&self.walkable_slope_deg) {
            return Err(Error::InvalidData(format!(
                "walkable slope out of range: {}",
                self.walkable_slope_deg
            )));
        }
        if self.walkable_height < 1 || self.walkable_climb < 0 || self.walkable_radius < 0 {
            return Err(Error::InvalidData(
                "invalid agent dimensions".to_string(),
            ));
        }
        if self.max_verts_per_poly < 3 {
            return Err(Error::InvalidData(
                "polygons need at least 3 vertices".to_string(),
            ));
        }
        if self.z_max <= self.z_min {
            return Err(Error::InvalidData("empty vertical extent".to_string()));
        }
        Ok(())
    }
}
