//! Salted tile slot arena.
//!
//! Holds the live tile blobs keyed by `(tile_x, tile_y, layer)`. Each
//! slot carries a salt that changes whenever its tile is replaced or
//! removed, invalidating outstanding [`PolyRef`]s without any tracking
//! of who holds them.

use std::collections::HashMap;

use log::warn;
use tilenav_common::{Error, Result, TileBounds, TileCoord};

use crate::blob::TileMeshBlob;
use crate::poly_ref::{PolyRef, SALT_MASK, TILE_MASK};

struct Slot {
    salt: u32,
    blob: Option<TileMeshBlob>,
}

impl Slot {
    fn bump_salt(&mut self) {
        self.salt = (self.salt + 1) & SALT_MASK as u32;
        if self.salt == 0 {
            self.salt = 1;
        }
    }
}

/// Tile storage with a fixed slot budget.
pub struct NavMeshStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    lookup: HashMap<(i32, i32, u16), u32>,
    max_tiles: usize,
}

impl NavMeshStore {
    /// Creates a store holding at most `max_tiles` tile layers.
    pub fn new(max_tiles: usize) -> Result<Self> {
        if max_tiles == 0 || max_tiles as u64 > TILE_MASK {
            return Err(Error::InvalidData(format!(
                "unsupported tile capacity: {max_tiles}"
            )));
        }
        Ok(Self {
            slots: Vec::new(),
            free: Vec::new(),
            lookup: HashMap::new(),
            max_tiles,
        })
    }

    pub fn max_tiles(&self) -> usize {
        self.max_tiles
    }

    /// Number of live tile layers.
    pub fn tile_count(&self) -> usize {
        self.lookup.len()
    }

    fn key(blob: &TileMeshBlob) -> (i32, i32, u16) {
        (blob.tile_x, blob.tile_y, blob.layer)
    }

    fn alloc_slot(&mut self) -> Result<u32> {
        if let Some(i) = self.free.pop() {
            return Ok(i);
        }
        if self.slots.len() >= self.max_tiles {
            return Err(Error::CapacityExceeded(format!(
                "tile capacity {} reached",
                self.max_tiles
            )));
        }
        self.slots.push(Slot {
            salt: 1,
            blob: None,
        });
        Ok(self.slots.len() as u32 - 1)
    }

    /// Inserts a tile layer that is not yet present.
    ///
    /// Returns the base reference of the new tile. Capacity exhaustion is
    /// reported without touching any existing tile.
    pub fn add_tile(&mut self, blob: TileMeshBlob) -> Result<PolyRef> {
        let key = Self::key(&blob);
        if self.lookup.contains_key(&key) {
            return Err(Error::InvalidData(format!(
                "tile ({}, {}) layer {} already present",
                key.0, key.1, key.2
            )));
        }
        let slot_idx = match self.alloc_slot() {
            Ok(i) => i,
            Err(e) => {
                warn!(
                    "dropping tile ({}, {}) layer {}: {e}",
                    key.0, key.1, key.2
                );
                return Err(e);
            }
        };
        let slot = &mut self.slots[slot_idx as usize];
        slot.blob = Some(blob);
        self.lookup.insert(key, slot_idx);
        Ok(PolyRef::encode(slot.salt, slot_idx, 0))
    }

    /// Removes a tile layer, invalidating references into it. Returns the
    /// removed blob, or `None` when nothing was stored there.
    pub fn remove_tile(&mut self, coord: TileCoord, layer: u16) -> Option<TileMeshBlob> {
        let slot_idx = self.lookup.remove(&(coord.x, coord.y, layer))?;
        let slot = &mut self.slots[slot_idx as usize];
        slot.bump_salt();
        let blob = slot.blob.take();
        self.free.push(slot_idx);
        blob
    }

    /// Replaces a tile layer in place with a single salt bump, or adds it
    /// when absent. The previous blob stays authoritative on failure.
    pub fn replace_tile(&mut self, blob: TileMeshBlob) -> Result<PolyRef> {
        let key = Self::key(&blob);
        match self.lookup.get(&key) {
            Some(&slot_idx) => {
                let slot = &mut self.slots[slot_idx as usize];
                slot.bump_salt();
                slot.blob = Some(blob);
                Ok(PolyRef::encode(slot.salt, slot_idx, 0))
            }
            None => self.add_tile(blob),
        }
    }

    /// All stored layers of one tile coordinate, ordered by layer index.
    pub fn get_tiles_at(&self, coord: TileCoord) -> Vec<&TileMeshBlob> {
        let mut out: Vec<&TileMeshBlob> = self
            .lookup
            .iter()
            .filter(|((x, y, _), _)| *x == coord.x && *y == coord.y)
            .filter_map(|(_, &slot)| self.slots[slot as usize].blob.as_ref())
            .collect();
        out.sort_by_key(|b| b.layer);
        out
    }

    /// World bounds of one stored tile layer.
    pub fn get_tile_bounds(&self, coord: TileCoord, layer: u16) -> Option<TileBounds> {
        let &slot = self.lookup.get(&(coord.x, coord.y, layer))?;
        self.slots[slot as usize].blob.as_ref().map(|b| b.bounds())
    }

    /// Base reference of one stored tile layer.
    pub fn get_tile_ref(&self, coord: TileCoord, layer: u16) -> Option<PolyRef> {
        let &slot = self.lookup.get(&(coord.x, coord.y, layer))?;
        self.slots[slot as usize]
            .blob
            .as_ref()
            .map(|_| PolyRef::encode(self.slots[slot as usize].salt, slot, 0))
    }

    /// Resolves a reference to its tile, when still valid.
    pub fn get_tile(&self, r: PolyRef) -> Option<&TileMeshBlob> {
        if r.is_null() {
            return None;
        }
        let slot = self.slots.get(r.tile_index() as usize)?;
        if slot.salt != r.salt() {
            return None;
        }
        slot.blob.as_ref()
    }

    /// True when the reference points at a live polygon.
    pub fn is_valid_ref(&self, r: PolyRef) -> bool {
        match self.get_tile(r) {
            Some(blob) => (r.poly_index() as usize) < blob.poly_count(),
            None => false,
        }
    }
}
