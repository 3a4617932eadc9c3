//! Geometry supply for tile builds.

use tilenav_common::{Result, TileBounds, TileCoord};
use tilenav_mesh::GeometryBatch;

/// Supplies tile geometry and the navigable extent to the scheduler.
///
/// Implemented by the host application over its scene index. `gather` must
/// be callable from worker threads; the scheduler serializes gathers when
/// running in [`GatherMode::InTask`], so the implementation only ever sees
/// one concurrent call in that mode.
pub trait GeometrySource: Send + Sync {
    /// World-space volumes that bound the navigable space. Tiles that do
    /// not intersect any volume are never built.
    fn inclusion_volumes(&self) -> Vec<TileBounds>;

    /// Collects the geometry overlapping one tile. `bounds` already
    /// includes the border margin around the tile proper.
    fn gather(&self, coord: TileCoord, bounds: &TileBounds) -> Result<GeometryBatch>;
}

/// Where tile geometry is gathered relative to task dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GatherMode {
    /// The coordinator gathers geometry while submitting and moves the
    /// batch into the task. Gathering blocks submission.
    #[default]
    OnSubmit,
    /// The worker gathers inside the task. At most one gather runs at a
    /// time so the scene index only needs to support a single reader
    /// concurrent with mutation.
    InTask,
}
