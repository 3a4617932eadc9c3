//! Salted polygon references.
//!
//! A `PolyRef` packs a slot salt, a tile slot index and a polygon index
//! into one `u64`. The salt changes whenever a slot's tile is replaced or
//! removed, so references held across a rebuild go stale instead of
//! silently pointing at the new tile.

/// Bits reserved for the slot salt.
pub const SALT_BITS: u32 = 16;
/// Bits reserved for the tile slot index.
pub const TILE_BITS: u32 = 28;
/// Bits reserved for the polygon index within a tile.
pub const POLY_BITS: u32 = 20;

pub const SALT_MASK: u64 = (1 << SALT_BITS) - 1;
pub const TILE_MASK: u64 = (1 << TILE_BITS) - 1;
pub const POLY_MASK: u64 = (1 << POLY_BITS) - 1;

/// Reference to one polygon of one stored tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PolyRef(pub u64);

impl PolyRef {
    pub const NULL: PolyRef = PolyRef(0);

    /// Packs the parts. Values beyond the field widths are masked off;
    /// callers enforce the limits when slots and polygons are allocated.
    #[inline]
    pub fn encode(salt: u32, tile_index: u32, poly_index: u32) -> Self {
        Self(
            ((salt as u64 & SALT_MASK) << (TILE_BITS + POLY_BITS))
                | ((tile_index as u64 & TILE_MASK) << POLY_BITS)
                | (poly_index as u64 & POLY_MASK),
        )
    }

    #[inline]
    pub fn salt(self) -> u32 {
        ((self.0 >> (TILE_BITS + POLY_BITS)) & SALT_MASK) as u32
    }

    #[inline]
    pub fn tile_index(self) -> u32 {
        ((self.0 >> POLY_BITS) & TILE_MASK) as u32
    }

    #[inline]
    pub fn poly_index(self) -> u32 {
        (self.0 & POLY_MASK) as u32
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Reference to a different polygon in the same tile.
    #[inline]
    pub fn with_poly(self, poly_index: u32) -> Self {
        Self::encode(self.salt(), self.tile_index(), poly_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let r = PolyRef::encode(0x1234, 0x0abc_def0, 0x000f_4240);
        assert_eq!(r.salt(), 0x1234);
        assert_eq!(r.tile_index(), 0x0abc_def0);
        assert_eq!(r.poly_index(), 0x000f_4240);
    }

    #[test]
    fn test_fields_do_not_bleed() {
        let r = PolyRef::encode(u32::MAX, u32::MAX, u32::MAX);
        assert_eq!(r.salt(), (SALT_MASK) as u32);
        assert_eq!(r.tile_index(), (TILE_MASK) as u32);
        assert_eq!(r.poly_index(), (POLY_MASK) as u32);
    }

    #[test]
    fn test_null() {
        assert!(PolyRef::NULL.is_null());
        assert!(!PolyRef::encode(1, 0, 0).is_null());
    }

    #[test]
    fn test_bit_budget_covers_u64() {
        assert_eq!(SALT_BITS + TILE_BITS + POLY_BITS, 64);
    }
}
