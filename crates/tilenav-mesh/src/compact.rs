//! Compact, column-indexed open-space representation.
//!
//! Where the heightfield stores solid voxels, the compact heightfield stores
//! the walkable floor surfaces on top of them plus 4-neighborhood
//! connectivity. Erosion and layer extraction run on this structure.

use glam::Vec3;
use tilenav_common::{dir_offset_x, dir_offset_y, Result};

use crate::{Heightfield, AREA_NULL};

/// Marker for "no connection in this direction".
pub const NOT_CONNECTED: u8 = 0xff;

const MAX_HEIGHT: i32 = 0xffff;

/// One cell of the compact heightfield: a slice into the span array.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span in the cell.
    pub index: u32,
    /// Number of spans in the cell.
    pub count: u32,
}

/// A walkable floor surface.
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor height in cells.
    pub z: u16,
    /// Clearance above the floor, in cells.
    pub h: u16,
    /// Area id.
    pub area: u8,
    /// Per-direction index of the connected span within the neighbor cell,
    /// or `NOT_CONNECTED`.
    pub con: [u8; 4],
}

/// Compact heightfield over one tile.
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub cells: Vec<CompactCell>,
    pub spans: Vec<CompactSpan>,
}

impl CompactHeightfield {
    /// Builds the compact representation from a filtered heightfield.
    ///
    /// Only walkable spans survive; connections link spans whose floors are
    /// within `walkable_climb` of each other with enough shared headroom.
    pub fn build_from_heightfield(
        hf: &Heightfield,
        walkable_height: i32,
        walkable_climb: i32,
    ) -> Result<Self> {
        let w = hf.width;
        let h = hf.height;
        let mut cells = vec![CompactCell::default(); (w * h) as usize];
        let mut spans = Vec::new();

        for y in 0..h {
            for x in 0..w {
                let col = hf.column(x, y);
                let first = spans.len() as u32;
                for (si, s) in col.iter().enumerate() {
                    if s.area == AREA_NULL {
                        continue;
                    }
                    let floor = s.smax as i32;
                    let ceiling = col
                        .get(si + 1)
                        .map(|n| n.smin as i32)
                        .unwrap_or(MAX_HEIGHT);
                    spans.push(CompactSpan {
                        z: s.smax,
                        h: (ceiling - floor).min(MAX_HEIGHT) as u16,
                        area: s.area,
                        con: [NOT_CONNECTED; 4],
                    });
                }
                cells[(x + y * w) as usize] = CompactCell {
                    index: first,
                    count: spans.len() as u32 - first,
                };
            }
        }

        let mut chf = Self {
            width: w,
            height: h,
            bmin: hf.bmin,
            bmax: hf.bmax,
            cs: hf.cs,
            ch: hf.ch,
            walkable_height,
            walkable_climb,
            cells,
            spans,
        };
        chf.build_connections();
        Ok(chf)
    }

    fn build_connections(&mut self) {
        let w = self.width;
        let h = self.height;
        for y in 0..h {
            for x in 0..w {
                let cell = self.cells[(x + y * w) as usize];
                for i in cell.index..cell.index + cell.count {
                    let (sz, sh) = {
                        let s = &self.spans[i as usize];
                        (s.z as i32, s.h as i32)
                    };
                    for dir in 0..4 {
                        let nx = x + dir_offset_x(dir);
                        let ny = y + dir_offset_y(dir);
                        if nx < 0 || ny < 0 || nx >= w || ny >= h {
                            continue;
                        }
                        let ncell = self.cells[(nx + ny * w) as usize];
                        for k in 0..ncell.count {
                            let n = &self.spans[(ncell.index + k) as usize];
                            let top = (sz + sh).min(n.z as i32 + n.h as i32);
                            let bot = sz.max(n.z as i32);
                            if top - bot >= self.walkable_height
                                && (n.z as i32 - sz).abs() <= self.walkable_climb
                            {
                                self.spans[i as usize].con[dir] = k as u8;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Index of the neighbor span of `span_idx` in `dir`, if connected.
    pub fn neighbor(&self, x: i32, y: i32, span_idx: usize, dir: usize) -> Option<usize> {
        let k = self.spans[span_idx].con[dir];
        if k == NOT_CONNECTED {
            return None;
        }
        let nx = x + dir_offset_x(dir);
        let ny = y + dir_offset_y(dir);
        let ncell = self.cells[(nx + ny * self.width) as usize];
        Some((ncell.index + k as u32) as usize)
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AREA_WALKABLE;

    fn flat_field(w: i32, h: i32) -> Heightfield {
        let mut hf = Heightfield::new(
            w,
            h,
            Vec3::ZERO,
            Vec3::new(w as f32, h as f32, 10.0),
            1.0,
            1.0,
        );
        for y in 0..h {
            for x in 0..w {
                hf.add_span(x, y, 0, 1, AREA_WALKABLE, 1).unwrap();
            }
        }
        hf
    }

    #[test]
    fn test_compact_from_flat_field() {
        let hf = flat_field(4, 4);
        let chf = CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap();
        assert_eq!(chf.span_count(), 16);
        // Interior span connects in all four directions.
        let cell = chf.cells[(1 + 1 * 4) as usize];
        let s = &chf.spans[cell.index as usize];
        assert!(s.con.iter().all(|&c| c != NOT_CONNECTED));
    }

    #[test]
    fn test_compact_skips_unwalkable() {
        let mut hf = flat_field(3, 3);
        hf.columns[4][0].area = AREA_NULL; // center cell
        let chf = CompactHeightfield::build_from_heightfield(&hf, 2, 1).unwrap();
        assert_eq!(chf.span_count(), 8);
        // West neighbor of the center no longer connects east.
        let cell = chf.cells[(0 + 1 * 3) as usize];
        let s = &chf.spans[cell.index as usize];
        assert_eq!(s.con[2], NOT_CONNECTED); // dir 2 = +x
    }

    #[test]
    fn test_climb_limit_breaks_connection() {
        let mut hf = Heightfield::new(2, 1, Vec3::ZERO, Vec3::new(2.0, 1.0, 10.0), 1.0, 1.0);
        hf.add_span(0, 0, 0, 1, AREA_WALKABLE, 1).unwrap();
        hf.add_span(1, 0, 0, 5, AREA_WALKABLE, 1).unwrap();
        let chf = CompactHeightfield::build_from_heightfield(&hf, 2, 2).unwrap();
        let s = &chf.spans[chf.cells[0].index as usize];
        assert_eq!(s.con[2], NOT_CONNECTED);
    }
}
