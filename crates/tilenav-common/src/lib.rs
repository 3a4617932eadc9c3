//! Common utilities and data structures shared by the tilenav baking crates.

mod geometry;
mod grid;
mod math;

pub use geometry::*;
pub use grid::*;
pub use math::*;

/// Represents a 3D position. The tile grid lies in the XY plane, Z is up.
pub type Vec3 = glam::Vec3;

/// Error taxonomy for the baking pipeline.
///
/// All tile-local failures are isolated to the tile that produced them;
/// the scheduler never unwinds on these.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("allocation limit reached: {0}")]
    OutOfMemory(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("compressed layer failure: {0}")]
    CompressionFailure(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tilenav operations.
pub type Result<T> = std::result::Result<T, Error>;
