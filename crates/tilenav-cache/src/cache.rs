//! The per-tile layer cache with optional disk persistence.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Mutex;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use tilenav_common::{Error, Result, TileCoord};

use crate::compressed::CompressedLayer;

const CACHE_MAGIC: u32 = u32::from_le_bytes(*b"TNLC");
const CACHE_VERSION: u32 = 1;

/// Compressed layers of previous bakes, keyed by tile coordinate.
///
/// Shared between the scheduler and workers, so access goes through an
/// internal mutex. Layer lists stay ordered by layer index and indices
/// stay contiguous after a removal.
#[derive(Default)]
pub struct LayerCache {
    entries: Mutex<HashMap<(i32, i32), Vec<CompressedLayer>>>,
}

impl LayerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every cached layer of one tile.
    pub fn store_layers(&self, coord: TileCoord, mut layers: Vec<CompressedLayer>) {
        layers.sort_by_key(|l| l.layer);
        for (i, l) in layers.iter_mut().enumerate() {
            l.layer = i as u16;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if layers.is_empty() {
            entries.remove(&(coord.x, coord.y));
        } else {
            entries.insert((coord.x, coord.y), layers);
        }
    }

    /// Cached layers of one tile, if any.
    pub fn get_layers(&self, coord: TileCoord) -> Option<Vec<CompressedLayer>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&(coord.x, coord.y)).cloned()
    }

    /// Drops one tile's layers entirely.
    pub fn remove(&self, coord: TileCoord) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(&(coord.x, coord.y)).is_some()
    }

    /// Removes a single layer; the remaining layers are reindexed so
    /// indices stay contiguous.
    pub fn remove_layer(&self, coord: TileCoord, layer: u16) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let Some(layers) = entries.get_mut(&(coord.x, coord.y)) else {
            return false;
        };
        let Some(pos) = layers.iter().position(|l| l.layer == layer) else {
            return false;
        };
        layers.remove(pos);
        for (i, l) in layers.iter_mut().enumerate() {
            l.layer = i as u16;
        }
        if layers.is_empty() {
            entries.remove(&(coord.x, coord.y));
        }
        true
    }

    pub fn tile_count(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.tile_count() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Writes the whole cache as a length-prefixed stream.
    pub fn save_to<W: Write>(&self, mut w: W) -> Result<()> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<&(i32, i32)> = entries.keys().collect();
        keys.sort();

        let layer_total: usize = entries.values().map(|v| v.len()).sum();
        w.write_u32::<LittleEndian>(CACHE_MAGIC)?;
        w.write_u32::<LittleEndian>(CACHE_VERSION)?;
        w.write_u32::<LittleEndian>(layer_total as u32)?;
        for key in keys {
            for l in &entries[key] {
                w.write_i32::<LittleEndian>(l.tile_x)?;
                w.write_i32::<LittleEndian>(l.tile_y)?;
                w.write_u16::<LittleEndian>(l.layer)?;
                w.write_u32::<LittleEndian>(l.raw_len)?;
                w.write_u32::<LittleEndian>(l.bytes.len() as u32)?;
                w.write_all(&l.bytes)?;
            }
        }
        Ok(())
    }

    /// Reads a cache previously written by [`LayerCache::save_to`].
    pub fn load_from<R: Read>(mut r: R) -> Result<Self> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != CACHE_MAGIC {
            return Err(Error::InvalidData(format!(
                "bad layer cache magic: {magic:#010x}"
            )));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != CACHE_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported layer cache version: {version}"
            )));
        }
        let count = r.read_u32::<LittleEndian>()? as usize;
        let mut entries: HashMap<(i32, i32), Vec<CompressedLayer>> = HashMap::new();
        for _ in 0..count {
            let tile_x = r.read_i32::<LittleEndian>()?;
            let tile_y = r.read_i32::<LittleEndian>()?;
            let layer = r.read_u16::<LittleEndian>()?;
            let raw_len = r.read_u32::<LittleEndian>()?;
            let len = r.read_u32::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            r.read_exact(&mut bytes)?;
            entries.entry((tile_x, tile_y)).or_default().push(CompressedLayer {
                tile_x,
                tile_y,
                layer,
                raw_len,
                bytes,
            });
        }
        for layers in entries.values_mut() {
            layers.sort_by_key(|l| l.layer);
        }
        debug!("loaded layer cache: {} tiles", entries.len());
        Ok(Self {
            entries: Mutex::new(entries),
        })
    }

    /// Persists the cache to a file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        self.save_to(std::io::BufWriter::new(file))
    }

    /// Loads a cache from a file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::load_from(std::io::BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(x: i32, y: i32, idx: u16, payload: u8) -> CompressedLayer {
        CompressedLayer {
            tile_x: x,
            tile_y: y,
            layer: idx,
            raw_len: 4,
            bytes: vec![payload; 8],
        }
    }

    #[test]
    fn test_store_and_get() {
        let cache = LayerCache::new();
        let coord = TileCoord::new(1, 2);
        cache.store_layers(coord, vec![layer(1, 2, 0, 0xaa), layer(1, 2, 1, 0xbb)]);
        let layers = cache.get_layers(coord).unwrap();
        assert_eq!(layers.len(), 2);
        assert_eq!(layers[0].layer, 0);
        assert!(cache.get_layers(TileCoord::new(9, 9)).is_none());
    }

    #[test]
    fn test_store_reindexes_contiguously() {
        let cache = LayerCache::new();
        let coord = TileCoord::new(0, 0);
        // Gappy input indices collapse to 0..n.
        cache.store_layers(coord, vec![layer(0, 0, 5, 1), layer(0, 0, 2, 2)]);
        let layers = cache.get_layers(coord).unwrap();
        assert_eq!(
            layers.iter().map(|l| l.layer).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_remove_layer_keeps_indices_contiguous() {
        let cache = LayerCache::new();
        let coord = TileCoord::new(3, 3);
        cache.store_layers(
            coord,
            vec![layer(3, 3, 0, 1), layer(3, 3, 1, 2), layer(3, 3, 2, 3)],
        );
        assert!(cache.remove_layer(coord, 1));
        let layers = cache.get_layers(coord).unwrap();
        assert_eq!(
            layers.iter().map(|l| l.layer).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(layers[1].bytes[0], 3); // the old layer 2 moved down
    }

    #[test]
    fn test_remove_last_layer_drops_entry() {
        let cache = LayerCache::new();
        let coord = TileCoord::new(0, 1);
        cache.store_layers(coord, vec![layer(0, 1, 0, 1)]);
        assert!(cache.remove_layer(coord, 0));
        assert!(cache.get_layers(coord).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let cache = LayerCache::new();
        cache.store_layers(TileCoord::new(0, 0), vec![layer(0, 0, 0, 7)]);
        cache.store_layers(
            TileCoord::new(-3, 4),
            vec![layer(-3, 4, 0, 9), layer(-3, 4, 1, 11)],
        );
        let mut buf = Vec::new();
        cache.save_to(&mut buf).unwrap();
        let loaded = LayerCache::load_from(buf.as_slice()).unwrap();
        assert_eq!(loaded.tile_count(), 2);
        assert_eq!(
            loaded.get_layers(TileCoord::new(-3, 4)),
            cache.get_layers(TileCoord::new(-3, 4))
        );
    }

    #[test]
    fn test_load_bad_magic() {
        let bytes = [0u8; 12];
        assert!(LayerCache::load_from(&bytes[..]).is_err());
    }

    #[test]
    fn test_save_is_deterministic() {
        let cache = LayerCache::new();
        cache.store_layers(TileCoord::new(2, 0), vec![layer(2, 0, 0, 1)]);
        cache.store_layers(TileCoord::new(1, 0), vec![layer(1, 0, 0, 2)]);
        let mut a = Vec::new();
        let mut b = Vec::new();
        cache.save_to(&mut a).unwrap();
        cache.save_to(&mut b).unwrap();
        assert_eq!(a, b);
    }
}
