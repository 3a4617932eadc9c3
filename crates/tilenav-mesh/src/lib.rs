//! Per-tile navigation mesh baking pipeline.
//!
//! Converts walkable triangle geometry into voxel heightfields, extracts
//! vertically stacked walkable layers, partitions them into regions, traces
//! region contours and builds convex polygon meshes suitable for a tiled
//! navigation mesh.

mod area;
mod compact;
mod config;
mod contour;
mod detail;
mod heightfield;
mod input;
mod layer;
mod polymesh;
mod rasterize;
mod region;

pub use area::{
    erode_walkable_area, filter_inclusion_bounds, mark_modifier, mark_modifiers,
};
pub use compact::{CompactCell, CompactHeightfield, CompactSpan, NOT_CONNECTED};
pub use config::{NavMeshConfig, Partitioning};
pub use contour::{build_contours, Contour, ContourSet, ContourVertex};
pub use detail::{build_detail_mesh, DetailMesh};
pub use heightfield::{Heightfield, Span};
pub use input::{AreaModifier, GeometryBatch, GeometryChunk, ModifierShape, OffMeshLink, OffMeshLinkKind};
pub use layer::{build_layer_grids, LayerGrid, EMPTY_CELL, MAX_LAYERS};
pub use polymesh::{build_poly_mesh, PolyMesh, MESH_NULL_IDX};
pub use rasterize::rasterize_batch;
pub use region::{build_regions, RegionSet};

/// Area id for non-walkable voxels.
pub const AREA_NULL: u8 = 0;
/// Reserved area id for low-clearance surfaces kept when `mark_low_areas`
/// mode is enabled.
pub const AREA_LOW: u8 = 62;
/// Default walkable area id.
pub const AREA_WALKABLE: u8 = 63;
