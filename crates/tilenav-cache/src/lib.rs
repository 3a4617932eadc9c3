//! Compressed layer cache for incremental tile rebuilds.
//!
//! Built layer grids are serialized, LZ4-compressed and kept per tile
//! coordinate. A rebuild whose geometry did not change can skip
//! rasterization entirely and restart from the cached layers.

mod cache;
mod compressed;

pub use cache::LayerCache;
pub use compressed::{compress_layer, decompress_layer, CompressedLayer};
