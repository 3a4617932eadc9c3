//! Incremental tile build scheduling.
//!
//! Couples the baking pipeline to a geometry source: world-space dirty
//! events become prioritized per-tile rebuild tasks on a bounded worker
//! pool, with results merged into a [`tilenav_store::NavMeshStore`] and a
//! compressed layer cache for geometry-unchanged rebuilds.

mod generator;
mod scheduler;
mod source;

pub use generator::{BuildCounters, TileBuildOutput, TileGenerator};
pub use scheduler::{BuildScheduler, DirtyEvent, DirtyFlags, SchedulerConfig};
pub use source::{GatherMode, GeometrySource};
