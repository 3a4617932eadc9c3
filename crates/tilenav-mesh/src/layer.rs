//! Heightfield layer extraction.
//!
//! Splits the compact heightfield into vertically stacked 2D layers: one
//! grid per concurrently-overlapping walkable surface (bridges, multi-story
//! geometry). The layer grid is the post-rasterization, pre-polygonization
//! artifact the cache compresses.

use glam::Vec3;
use tilenav_common::{Error, Result};

use crate::CompactHeightfield;

/// Height value meaning "no walkable surface in this cell".
pub const EMPTY_CELL: u16 = 0xffff;

/// Maximum number of layers a tile may produce.
pub const MAX_LAYERS: usize = 32;

/// One walkable layer of a tile: per-cell floor height and area id.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerGrid {
    pub tile_x: i32,
    pub tile_y: i32,
    /// Layer index within the tile, contiguous from zero.
    pub layer: u16,
    /// Grid width in cells (tile plus border).
    pub width: i32,
    /// Grid height in cells (tile plus border).
    pub height: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Height range actually occupied, in cells.
    pub hmin: u16,
    pub hmax: u16,
    /// Floor heights, `EMPTY_CELL` where no surface exists.
    pub heights: Vec<u16>,
    /// Area ids, zero where no surface exists.
    pub areas: Vec<u8>,
}

impl LayerGrid {
    #[inline]
    pub fn idx(&self, x: i32, y: i32) -> usize {
        (x + y * self.width) as usize
    }

    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width && y < self.height
    }

    /// World-space position of a cell center at its floor height.
    pub fn cell_center(&self, x: i32, y: i32) -> Vec3 {
        let h = self.heights[self.idx(x, y)];
        Vec3::new(
            self.bmin.x + (x as f32 + 0.5) * self.cs,
            self.bmin.y + (y as f32 + 0.5) * self.cs,
            self.bmin.z + h as f32 * self.ch,
        )
    }

    /// Number of non-empty cells.
    pub fn occupied_cells(&self) -> usize {
        self.heights.iter().filter(|&&h| h != EMPTY_CELL).count()
    }

    /// Deterministic serialization used by the layer cache.
    pub fn to_bytes(&self) -> Vec<u8> {
        let cell_count = (self.width * self.height) as usize;
        let mut out = Vec::with_capacity(64 + cell_count * 3);
        out.extend_from_slice(&self.tile_x.to_le_bytes());
        out.extend_from_slice(&self.tile_y.to_le_bytes());
        out.extend_from_slice(&(self.layer as u32).to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        for v in [self.bmin, self.bmax] {
            out.extend_from_slice(&v.x.to_le_bytes());
            out.extend_from_slice(&v.y.to_le_bytes());
            out.extend_from_slice(&v.z.to_le_bytes());
        }
        out.extend_from_slice(&self.cs.to_le_bytes());
        out.extend_from_slice(&self.ch.to_le_bytes());
        out.extend_from_slice(&self.hmin.to_le_bytes());
        out.extend_from_slice(&self.hmax.to_le_bytes());
        for h in &self.heights {
            out.extend_from_slice(&h.to_le_bytes());
        }
        out.extend_from_slice(&self.areas);
        out
    }

    /// Inverse of [`LayerGrid::to_bytes`]. Length-checked; truncated input
    /// yields an error rather than a panic.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Reader { data, pos: 0 };
        let tile_x = r.i32()?;
        let tile_y = r.i32()?;
        let layer = r.u32()? as u16;
        let width = r.i32()?;
        let height = r.i32()?;
        if width <= 0 || height <= 0 || (width as i64) * (height as i64) > i32::MAX as i64 {
            return Err(Error::InvalidData(format!(
                "bad layer grid dimensions: {width}x{height}"
            )));
        }
        let bmin = Vec3::new(r.f32()?, r.f32()?, r.f32()?);
        let bmax = Vec3::new(r.f32()?, r.f32()?, r.f32()?);
        let cs = r.f32()?;
        let ch = r.f32()?;
        let hmin = r.u16()?;
        let hmax = r.u16()?;
        let cell_count = (width * height) as usize;
        let mut heights = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            heights.push(r.u16()?);
        }
        let areas = r.bytes(cell_count)?.to_vec();
        Ok(Self {
            tile_x,
            tile_y,
            layer,
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            hmin,
            hmax,
            heights,
            areas,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::InvalidData("truncated layer grid".to_string()));
        }
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }
    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }
    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }
    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }
    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}

/// 2D sub-region used during layer assignment.
#[derive(Debug, Clone, Default)]
struct LayerRegion {
    zmin: u16,
    zmax: u16,
    /// Regions reachable by walking.
    connections: Vec<u16>,
    /// Regions stacked above/below in some shared column.
    overlaps: Vec<u16>,
    layer: Option<u16>,
}

fn push_unique(v: &mut Vec<u16>, id: u16) {
    if !v.contains(&id) {
        v.push(id);
    }
}

/// Splits the compact heightfield into walkable layers.
///
/// Returns zero grids when the tile has no walkable surface; more than
/// [`MAX_LAYERS`] stacked surfaces is an error.
pub fn build_layer_grids(
    chf: &CompactHeightfield,
    tile_x: i32,
    tile_y: i32,
) -> Result<Vec<LayerGrid>> {
    let w = chf.width;
    let h = chf.height;
    if chf.spans.is_empty() {
        return Ok(Vec::new());
    }

    // Stage 1: monotone 2D sub-regions. Rows are swept bottom-up; runs of
    // mutually connected spans share an id and merge with the row below
    // through their south connections.
    let mut span_region = vec![u16::MAX; chf.spans.len()];
    let mut regions: Vec<LayerRegion> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let cell = chf.cells[(x + y * w) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                if span_region[i] != u16::MAX || chf.spans[i].area == crate::AREA_NULL {
                    continue;
                }
                // Merge with the west neighbor when connected; otherwise a
                // fresh region.
                let west = chf.neighbor(x, y, i, 0).filter(|&n| span_region[n] != u16::MAX);
                let rid = match west {
                    Some(n) => span_region[n],
                    None => {
                        if regions.len() >= u16::MAX as usize {
                            return Err(Error::OutOfMemory(
                                "too many layer sub-regions".to_string(),
                            ));
                        }
                        regions.push(LayerRegion::default());
                        let rid = (regions.len() - 1) as u16;
                        regions[rid as usize].zmin = u16::MAX;
                        rid
                    }
                };
                span_region[i] = rid;
                let z = chf.spans[i].z;
                let reg = &mut regions[rid as usize];
                reg.zmin = reg.zmin.min(z);
                reg.zmax = reg.zmax.max(z);
            }
        }
    }

    // Stage 2: adjacency. Walking connections become layer-merge
    // candidates; same-column stacking becomes an overlap constraint.
    for y in 0..h {
        for x in 0..w {
            let cell = chf.cells[(x + y * w) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                let rid = span_region[i];
                if rid == u16::MAX {
                    continue;
                }
                for dir in 0..4 {
                    if let Some(n) = chf.neighbor(x, y, i, dir) {
                        let nrid = span_region[n];
                        if nrid != u16::MAX && nrid != rid {
                            push_unique(&mut regions[rid as usize].connections, nrid);
                        }
                    }
                }
                for j in cell.index..cell.index + cell.count {
                    let j = j as usize;
                    if i == j {
                        continue;
                    }
                    let orid = span_region[j];
                    if orid != u16::MAX && orid != rid {
                        push_unique(&mut regions[rid as usize].overlaps, orid);
                    }
                }
            }
        }
    }

    // Stage 3: greedy layer assignment. Walk connected regions into the
    // current layer unless they overlap a member or stretch the layer's
    // height range too far to stay a single surface.
    let mut layer_count: u16 = 0;
    for seed in 0..regions.len() {
        if regions[seed].layer.is_some() {
            continue;
        }
        let layer_id = layer_count;
        layer_count += 1;
        regions[seed].layer = Some(layer_id);
        let mut members = vec![seed as u16];
        let mut zmin = regions[seed].zmin;
        let mut zmax = regions[seed].zmax;

        let mut queue = vec![seed as u16];
        while let Some(rid) = queue.pop() {
            let conns = regions[rid as usize].connections.clone();
            'next: for nrid in conns {
                if regions[nrid as usize].layer.is_some() {
                    continue;
                }
                let nzmin = regions[nrid as usize].zmin;
                let nzmax = regions[nrid as usize].zmax;
                if zmax.max(nzmax) as i32 - zmin.min(nzmin) as i32 >= 255 {
                    continue;
                }
                for &m in &members {
                    if regions[nrid as usize].overlaps.contains(&m) {
                        continue 'next;
                    }
                }
                regions[nrid as usize].layer = Some(layer_id);
                members.push(nrid);
                zmin = zmin.min(nzmin);
                zmax = zmax.max(nzmax);
                queue.push(nrid);
            }
        }
    }

    if layer_count as usize > MAX_LAYERS {
        return Err(Error::CapacityExceeded(format!(
            "tile ({tile_x}, {tile_y}) produced {layer_count} layers (max {MAX_LAYERS})"
        )));
    }

    // Stage 4: emit one grid per layer.
    let cell_count = (w * h) as usize;
    let mut grids: Vec<LayerGrid> = (0..layer_count)
        .map(|layer| LayerGrid {
            tile_x,
            tile_y,
            layer,
            width: w,
            height: h,
            bmin: chf.bmin,
            bmax: chf.bmax,
            cs: chf.cs,
            ch: chf.ch,
            hmin: u16::MAX,
            hmax: 0,
            heights: vec![EMPTY_CELL; cell_count],
            areas: vec![0; cell_count],
        })
        .collect();

    for y in 0..h {
        for x in 0..w {
            let cell = chf.cells[(x + y * w) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                if span_region[i] == u16::MAX {
                    continue;
                }
                let rid = span_region[i] as usize;
                let Some(layer) = regions[rid].layer else {
                    continue;
                };
                let grid = &mut grids[layer as usize];
                let idx = (x + y * w) as usize;
                let s = &chf.spans[i];
                grid.heights[idx] = s.z;
                grid.areas[idx] = s.area;
                grid.hmin = grid.hmin.min(s.z);
                grid.hmax = grid.hmax.max(s.z);
            }
        }
    }

    // Tighten each grid's vertical bounds to the occupied range.
    for g in &mut grids {
        if g.hmin == u16::MAX {
            g.hmin = 0;
        }
        g.bmin.z = chf.bmin.z + g.hmin as f32 * chf.ch;
        g.bmax.z = chf.bmin.z + (g.hmax as f32 + 1.0) * chf.ch;
    }

    Ok(grids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CompactHeightfield, Heightfield, AREA_WALKABLE};

    fn compact(hf: &Heightfield) -> CompactHeightfield {
        CompactHeightfield::build_from_heightfield(hf, 2, 1).unwrap()
    }

    #[test]
    fn test_single_flat_layer() {
        let mut hf = Heightfield::new(6, 6, Vec3::ZERO, Vec3::new(6.0, 6.0, 10.0), 1.0, 1.0);
        for y in 0..6 {
            for x in 0..6 {
                hf.add_span(x, y, 0, 1, AREA_WALKABLE, 1).unwrap();
            }
        }
        let grids = build_layer_grids(&compact(&hf), 0, 0).unwrap();
        assert_eq!(grids.len(), 1);
        assert_eq!(grids[0].occupied_cells(), 36);
        assert_eq!(grids[0].hmin, 1);
    }

    #[test]
    fn test_bridge_makes_two_layers() {
        let mut hf = Heightfield::new(6, 6, Vec3::ZERO, Vec3::new(6.0, 6.0, 40.0), 1.0, 1.0);
        for y in 0..6 {
            for x in 0..6 {
                hf.add_span(x, y, 0, 1, AREA_WALKABLE, 1).unwrap();
            }
        }
        // Elevated strip crossing the middle.
        for x in 0..6 {
            hf.add_span(x, 3, 20, 21, AREA_WALKABLE, 1).unwrap();
        }
        let grids = build_layer_grids(&compact(&hf), 0, 0).unwrap();
        assert_eq!(grids.len(), 2);
        let total: usize = grids.iter().map(|g| g.occupied_cells()).sum();
        assert_eq!(total, 42);
    }

    #[test]
    fn test_empty_field_zero_layers() {
        let hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 4.0, 10.0), 1.0, 1.0);
        let grids = build_layer_grids(&compact(&hf), 0, 0).unwrap();
        assert!(grids.is_empty());
    }

    #[test]
    fn test_layer_grid_roundtrip() {
        let mut hf = Heightfield::new(4, 4, Vec3::ZERO, Vec3::new(4.0, 4.0, 10.0), 1.0, 1.0);
        for y in 0..4 {
            for x in 0..4 {
                hf.add_span(x, y, 0, 1, AREA_WALKABLE, 1).unwrap();
            }
        }
        let grids = build_layer_grids(&compact(&hf), 3, -2).unwrap();
        let bytes = grids[0].to_bytes();
        let back = LayerGrid::from_bytes(&bytes).unwrap();
        assert_eq!(back, grids[0]);
    }

    #[test]
    fn test_layer_grid_truncated_rejected() {
        let mut hf = Heightfield::new(2, 2, Vec3::ZERO, Vec3::new(2.0, 2.0, 10.0), 1.0, 1.0);
        hf.add_span(0, 0, 0, 1, AREA_WALKABLE, 1).unwrap();
        let grids = build_layer_grids(&compact(&hf), 0, 0).unwrap();
        let bytes = grids[0].to_bytes();
        assert!(LayerGrid::from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }
}
