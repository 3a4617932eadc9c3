//! Compressed layer representation.
//!
//! A [`CompressedLayer`] is the immutable cache entry for one vertical
//! layer of one tile: the serialized layer grid run through LZ4 with a
//! prepended size. Compression is deterministic for identical input,
//! which keeps cache hits byte-comparable.

use tilenav_common::{Error, Result};
use tilenav_mesh::LayerGrid;

/// One cached layer. `layer` is the index within its tile; the cache
/// keeps indices contiguous per tile.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
pub struct CompressedLayer {
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: u16,
    /// Uncompressed size, for validation and allocation.
    pub raw_len: u32,
    pub bytes: Vec<u8>,
}

/// Compresses a built layer grid into a cache entry.
pub fn compress_layer(grid: &LayerGrid) -> Result<CompressedLayer> {
    let raw = grid.to_bytes();
    let bytes = lz4_flex::compress_prepend_size(&raw);
    Ok(CompressedLayer {
        tile_x: grid.tile_x,
        tile_y: grid.tile_y,
        layer: grid.layer,
        raw_len: raw.len() as u32,
        bytes,
    })
}

/// Decompresses a cache entry back into a layer grid.
///
/// Any LZ4 or layout failure surfaces as `CompressionFailure`; callers
/// treat that as a cache miss and rebuild from geometry.
pub fn decompress_layer(layer: &CompressedLayer) -> Result<LayerGrid> {
    let raw = lz4_flex::decompress_size_prepended(&layer.bytes).map_err(|e| {
        Error::CompressionFailure(format!(
            "layer ({}, {}) #{}: {e}",
            layer.tile_x, layer.tile_y, layer.layer
        ))
    })?;
    if raw.len() != layer.raw_len as usize {
        return Err(Error::CompressionFailure(format!(
            "layer ({}, {}) #{}: size mismatch ({} != {})",
            layer.tile_x,
            layer.tile_y,
            layer.layer,
            raw.len(),
            layer.raw_len
        )));
    }
    LayerGrid::from_bytes(&raw)
        .map_err(|e| Error::CompressionFailure(format!("undecodable layer grid: {e}")))
}
