//! Contour tracing and simplification.
//!
//! Walks each region's border into a closed polyline, simplifies it with a
//! perpendicular-error bound, splits overlong edges, and records which
//! regions touch each other for cluster building.

use tilenav_common::{dir_offset_x, dir_offset_y, dist_pt_seg_sq_2d, Error, Result};

use crate::{LayerGrid, NavMeshConfig, RegionSet, EMPTY_CELL};

/// One vertex of a simplified contour, in cell coordinates of the layer
/// grid (border included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContourVertex {
    pub x: i32,
    pub y: i32,
    /// Floor height at the corner, in height cells.
    pub z: u16,
    /// Region on the far side of the edge leaving this vertex, 0 for a
    /// wall edge.
    pub neighbor: u16,
}

/// A closed border polyline of one region, counter-clockwise.
#[derive(Debug, Clone)]
pub struct Contour {
    pub region: u16,
    pub area: u8,
    pub verts: Vec<ContourVertex>,
}

/// All contours of one layer plus the region adjacency they exposed.
#[derive(Debug, Clone)]
pub struct ContourSet {
    pub width: i32,
    pub height: i32,
    pub border: i32,
    pub contours: Vec<Contour>,
    /// Unordered region id pairs that share a traversable border.
    pub adjacency: Vec<(u16, u16)>,
}

/// Raw vertex emitted by the border walk.
#[derive(Debug, Clone, Copy)]
struct RawVertex {
    x: i32,
    y: i32,
    z: u16,
    neighbor: u16,
}

/// Traces and simplifies the borders of every region in the layer.
pub fn build_contours(
    grid: &LayerGrid,
    regions: &RegionSet,
    config: &NavMeshConfig,
    border: i32,
) -> Result<ContourSet> {
    let w = grid.width;
    let h = grid.height;
    if regions.width != w || regions.height != h {
        return Err(Error::InvalidData(format!(
            "region set {}x{} does not match grid {w}x{h}",
            regions.width, regions.height
        )));
    }

    // Mark the boundary edges of every cell: bit per direction where the
    // neighbor belongs to a different region.
    let mut flags = vec![0u8; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let idx = grid.idx(x, y);
            if regions.ids[idx] == 0 {
                continue;
            }
            for dir in 0..4usize {
                if region_across(regions, x, y, dir) != regions.ids[idx] {
                    flags[idx] |= 1 << dir;
                }
            }
        }
    }

    let mut adjacency: Vec<(u16, u16)> = Vec::new();
    // Per-region contour list; holes are merged afterwards.
    let mut per_region: Vec<Vec<Vec<ContourVertex>>> =
        vec![Vec::new(); regions.count as usize + 1];
    let mut region_area = vec![0u8; regions.count as usize + 1];

    for y in 0..h {
        for x in 0..w {
            let idx = grid.idx(x, y);
            let rid = regions.ids[idx];
            if rid == 0 || flags[idx] == 0 {
                continue;
            }
            region_area[rid as usize] = grid.areas[idx];
            let dir = (0..4).find(|&d| flags[idx] & (1 << d) != 0);
            let Some(dir) = dir else { continue };

            let raw = walk_border(grid, regions, config.walkable_climb, &mut flags, x, y, dir)?;
            for v in &raw {
                if v.neighbor != 0 {
                    let pair = (rid.min(v.neighbor), rid.max(v.neighbor));
                    if !adjacency.contains(&pair) {
                        adjacency.push(pair);
                    }
                }
            }

            let mut simplified = simplify(
                &raw,
                config.max_simplification_error,
                config.max_edge_len,
            );
            remove_degenerate(&mut simplified);
            if simplified.len() >= 3 {
                per_region[rid as usize].push(simplified);
            }
        }
    }

    let mut contours = Vec::new();
    for rid in 1..=regions.count {
        let mut loops = std::mem::take(&mut per_region[rid as usize]);
        if loops.is_empty() {
            continue;
        }
        // The walk emits outers clockwise; normalize to CCW so that holes
        // (which come out CCW) become CW and merge with reversed winding.
        for lp in &mut loops {
            lp.reverse();
        }
        let verts = merge_holes(loops);
        if verts.len() >= 3 {
            contours.push(Contour {
                region: rid,
                area: region_area[rid as usize],
                verts,
            });
        }
    }

    adjacency.sort_unstable();
    Ok(ContourSet {
        width: w,
        height: h,
        border,
        contours,
        adjacency,
    })
}

/// Region id of the cell across `dir`, 0 when out of bounds or unassigned.
#[inline]
fn region_across(regions: &RegionSet, x: i32, y: i32, dir: usize) -> u16 {
    let nx = x + dir_offset_x(dir);
    let ny = y + dir_offset_y(dir);
    if nx < 0 || ny < 0 || nx >= regions.width || ny >= regions.height {
        return 0;
    }
    regions.ids[(nx + ny * regions.width) as usize]
}

/// Like [`region_across`], but 0 unless the step is within `climb`. Edges
/// across a cliff read as walls even when both sides carry regions.
#[inline]
fn portal_across(
    grid: &LayerGrid,
    regions: &RegionSet,
    climb: i32,
    x: i32,
    y: i32,
    dir: usize,
) -> u16 {
    let rid = region_across(regions, x, y, dir);
    if rid == 0 {
        return 0;
    }
    let h = grid.heights[grid.idx(x, y)];
    let nh = grid.heights[grid.idx(x + dir_offset_x(dir), y + dir_offset_y(dir))];
    if h == EMPTY_CELL || nh == EMPTY_CELL || (h as i32 - nh as i32).abs() > climb {
        return 0;
    }
    rid
}

/// Height at a grid corner: the highest floor among the cells that touch it.
fn corner_height(grid: &LayerGrid, cx: i32, cy: i32) -> u16 {
    let mut best = 0u16;
    for (dx, dy) in [(-1, -1), (0, -1), (-1, 0), (0, 0)] {
        let x = cx + dx;
        let y = cy + dy;
        if x < 0 || y < 0 || x >= grid.width || y >= grid.height {
            continue;
        }
        let h = grid.heights[grid.idx(x, y)];
        if h != EMPTY_CELL {
            best = best.max(h);
        }
    }
    best
}

/// Follows the region border from a flagged edge until the loop closes.
fn walk_border(
    grid: &LayerGrid,
    regions: &RegionSet,
    climb: i32,
    flags: &mut [u8],
    start_x: i32,
    start_y: i32,
    start_dir: usize,
) -> Result<Vec<RawVertex>> {
    let mut x = start_x;
    let mut y = start_y;
    let mut dir = start_dir;
    let mut raw = Vec::new();

    let max_iter = (grid.width * grid.height * 4) as usize + 16;
    for _ in 0..max_iter {
        let idx = grid.idx(x, y);
        if flags[idx] & (1 << dir) != 0 {
            // Boundary edge: emit the corner it starts at.
            let (cx, cy) = match dir {
                0 => (x, y + 1),
                1 => (x + 1, y + 1),
                2 => (x + 1, y),
                _ => (x, y),
            };
            raw.push(RawVertex {
                x: cx,
                y: cy,
                z: corner_height(grid, cx, cy),
                neighbor: portal_across(grid, regions, climb, x, y, dir),
            });
            flags[idx] &= !(1 << dir);
            dir = (dir + 1) & 3;
        } else {
            x += dir_offset_x(dir);
            y += dir_offset_y(dir);
            dir = (dir + 3) & 3;
        }
        if x == start_x && y == start_y && dir == start_dir {
            return Ok(raw);
        }
    }
    Err(Error::InvalidData(format!(
        "contour walk did not close at ({start_x}, {start_y})"
    )))
}

/// Simplifies a raw border loop.
///
/// Seed points are placed where the far-side region changes; wall
/// stretches are then refined until their deviation stays within
/// `max_error` cells, and any edge longer than `max_edge_len` is split at
/// its midpoint vertex.
fn simplify(raw: &[RawVertex], max_error: f32, max_edge_len: i32) -> Vec<ContourVertex> {
    let n = raw.len();
    if n == 0 {
        return Vec::new();
    }

    // (raw index) of each kept point.
    let mut kept: Vec<usize> = Vec::new();
    if raw.iter().any(|v| v.neighbor != raw[0].neighbor) {
        for i in 0..n {
            let j = (i + 1) % n;
            if raw[i].neighbor != raw[j].neighbor {
                kept.push(j);
            }
        }
    } else {
        // Isolated loop with a uniform far side: anchor at the two
        // extreme corners.
        let mut ll = 0;
        let mut ur = 0;
        for (i, v) in raw.iter().enumerate() {
            if (v.x, v.y) < (raw[ll].x, raw[ll].y) {
                ll = i;
            }
            if (v.x, v.y) > (raw[ur].x, raw[ur].y) {
                ur = i;
            }
        }
        kept.push(ll);
        if ur != ll {
            kept.push(ur);
        }
    }
    kept.sort_unstable();
    kept.dedup();

    // Deviation refinement on wall stretches.
    let err_sq = max_error * max_error;
    let mut i = 0;
    while i < kept.len() {
        let ai = kept[i];
        let bi = kept[(i + 1) % kept.len()];
        if raw[ai].neighbor != 0 {
            i += 1;
            continue;
        }
        let (ax, ay) = (raw[ai].x as f32, raw[ai].y as f32);
        let (bx, by) = (raw[bi].x as f32, raw[bi].y as f32);
        let mut worst = 0.0f32;
        let mut worst_idx = None;
        let mut ci = (ai + 1) % n;
        while ci != bi {
            let d = dist_pt_seg_sq_2d(raw[ci].x as f32, raw[ci].y as f32, ax, ay, bx, by);
            if d > worst {
                worst = d;
                worst_idx = Some(ci);
            }
            ci = (ci + 1) % n;
        }
        match worst_idx {
            Some(ci) if worst > err_sq => kept.insert(i + 1, ci),
            _ => i += 1,
        }
    }

    // Split overlong edges at the raw midpoint.
    if max_edge_len > 0 {
        let max_len_sq = (max_edge_len as i64) * (max_edge_len as i64);
        let mut i = 0;
        while i < kept.len() {
            let ai = kept[i];
            let bi = kept[(i + 1) % kept.len()];
            let dx = (raw[bi].x - raw[ai].x) as i64;
            let dy = (raw[bi].y - raw[ai].y) as i64;
            let span = if bi > ai { bi - ai } else { bi + n - ai };
            if dx * dx + dy * dy > max_len_sq && span > 1 {
                kept.insert(i + 1, (ai + span / 2) % n);
            } else {
                i += 1;
            }
        }
    }

    kept.iter()
        .map(|&ri| ContourVertex {
            x: raw[ri].x,
            y: raw[ri].y,
            z: raw[ri].z,
            neighbor: raw[ri].neighbor,
        })
        .collect()
}

fn remove_degenerate(verts: &mut Vec<ContourVertex>) {
    let mut i = 0;
    while verts.len() >= 2 && i < verts.len() {
        let j = (i + 1) % verts.len();
        if verts[i].x == verts[j].x && verts[i].y == verts[j].y {
            verts.remove(j);
        } else {
            i += 1;
        }
    }
}

fn signed_area2(verts: &[ContourVertex]) -> i64 {
    let mut acc = 0i64;
    for i in 0..verts.len() {
        let j = (i + 1) % verts.len();
        acc += verts[i].x as i64 * verts[j].y as i64 - verts[j].x as i64 * verts[i].y as i64;
    }
    acc
}

/// Merges hole loops of a region into its outer loop with bridge edges at
/// the closest vertex pairs.
fn merge_holes(mut loops: Vec<Vec<ContourVertex>>) -> Vec<ContourVertex> {
    if loops.len() == 1 {
        return loops.pop().unwrap_or_default();
    }
    // Outer loop has the largest positive area after normalization.
    let outer_idx = loops
        .iter()
        .enumerate()
        .max_by_key(|(_, l)| signed_area2(l))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut outer = loops.swap_remove(outer_idx);

    for hole in loops {
        // Closest vertex pair becomes the bridge.
        let mut best = (0usize, 0usize, i64::MAX);
        for (oi, ov) in outer.iter().enumerate() {
            for (hi, hv) in hole.iter().enumerate() {
                let dx = (ov.x - hv.x) as i64;
                let dy = (ov.y - hv.y) as i64;
                let d = dx * dx + dy * dy;
                if d < best.2 {
                    best = (oi, hi, d);
                }
            }
        }
        let (oi, hi, _) = best;
        // Splice: outer[..=oi], hole from hi around, back to hole[hi] and
        // outer[oi].
        let mut merged = Vec::with_capacity(outer.len() + hole.len() + 2);
        merged.extend_from_slice(&outer[..=oi]);
        for k in 0..=hole.len() {
            merged.push(hole[(hi + k) % hole.len()]);
        }
        merged.push(outer[oi]);
        merged.extend_from_slice(&outer[oi + 1..]);
        outer = merged;
    }
    outer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{build_regions, NavMeshConfig, Partitioning, AREA_WALKABLE, EMPTY_CELL};
    use glam::Vec3;

    fn grid(w: i32, h: i32) -> LayerGrid {
        LayerGrid {
            tile_x: 0,
            tile_y: 0,
            layer: 0,
            width: w,
            height: h,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(w as f32, h as f32, 10.0),
            cs: 1.0,
            ch: 1.0,
            hmin: 0,
            hmax: 0,
            heights: vec![EMPTY_CELL; (w * h) as usize],
            areas: vec![0; (w * h) as usize],
        }
    }

    fn fill(g: &mut LayerGrid, x0: i32, y0: i32, x1: i32, y1: i32, h: u16) {
        for y in y0..y1 {
            for x in x0..x1 {
                let idx = g.idx(x, y);
                g.heights[idx] = h;
                g.areas[idx] = AREA_WALKABLE;
            }
        }
    }

    fn config() -> NavMeshConfig {
        NavMeshConfig {
            partitioning: Partitioning::Monotone,
            min_region_area: 2,
            merge_region_area: 400,
            walkable_climb: 1,
            max_simplification_error: 1.3,
            max_edge_len: 0,
            ..NavMeshConfig::default()
        }
    }

    fn trace(g: &LayerGrid, cfg: &NavMeshConfig) -> ContourSet {
        let rs = build_regions(g, cfg, 0).unwrap();
        build_contours(g, &rs, cfg, 0).unwrap()
    }

    #[test]
    fn test_square_plate_simplifies_to_quad() {
        let mut g = grid(10, 10);
        fill(&mut g, 1, 1, 9, 9, 5);
        let cs = trace(&g, &config());
        assert_eq!(cs.contours.len(), 1);
        let c = &cs.contours[0];
        assert_eq!(c.verts.len(), 4);
        assert!(signed_area2(&c.verts) > 0, "outer contour must be CCW");
        for v in &c.verts {
            assert!(v.x == 1 || v.x == 9);
            assert!(v.y == 1 || v.y == 9);
        }
    }

    #[test]
    fn test_max_edge_len_splits_long_edges() {
        let mut g = grid(20, 8);
        fill(&mut g, 0, 0, 20, 8, 5);
        let mut cfg = config();
        cfg.max_edge_len = 6;
        let cs = trace(&g, &cfg);
        assert_eq!(cs.contours.len(), 1);
        for (i, v) in cs.contours[0].verts.iter().enumerate() {
            let w = &cs.contours[0].verts[(i + 1) % cs.contours[0].verts.len()];
            let d2 = ((w.x - v.x) as i64).pow(2) + ((w.y - v.y) as i64).pow(2);
            assert!(d2 <= 36 + 1, "edge too long: {d2}");
        }
    }

    #[test]
    fn test_adjacent_regions_record_adjacency() {
        // U shape: two arms joined by a top bar. The monotone sweep must
        // give the arms distinct regions and the bar a third; the bar
        // borders both arms traversably.
        let mut g = grid(8, 8);
        fill(&mut g, 0, 0, 3, 6, 5);
        fill(&mut g, 5, 0, 8, 6, 5);
        fill(&mut g, 0, 6, 8, 8, 5);
        let cs = trace(&g, &config());
        assert_eq!(cs.contours.len(), 3);
        assert_eq!(cs.adjacency.len(), 2);
    }

    #[test]
    fn test_cliff_border_is_a_wall_not_a_portal() {
        let mut g = grid(12, 6);
        fill(&mut g, 0, 0, 6, 6, 5);
        fill(&mut g, 6, 0, 12, 6, 50); // step far beyond climb
        let cs = trace(&g, &config());
        assert_eq!(cs.contours.len(), 2);
        assert!(cs.adjacency.is_empty());
        for c in &cs.contours {
            assert!(c.verts.iter().all(|v| v.neighbor == 0));
        }
    }

    #[test]
    fn test_hole_merged_into_outer() {
        let mut g = grid(12, 12);
        fill(&mut g, 1, 1, 11, 11, 5);
        // Punch a hole in the middle.
        for y in 5..7 {
            for x in 5..7 {
                let idx = g.idx(x, y);
                g.heights[idx] = EMPTY_CELL;
                g.areas[idx] = 0;
            }
        }
        // Watershed keeps the ring a single region; the hole loop must be
        // bridged into the outer loop.
        let mut cfg = config();
        cfg.partitioning = Partitioning::Watershed;
        cfg.merge_region_area = 400;
        let cs = trace(&g, &cfg);
        assert_eq!(cs.contours.len(), 1);
        // The bridge duplicates two vertices, so the merged loop carries
        // both the outer quad and the hole.
        assert!(cs.contours[0].verts.len() >= 8);
    }

    #[test]
    fn test_empty_layer_no_contours() {
        let g = grid(6, 6);
        let cs = trace(&g, &config());
        assert!(cs.contours.is_empty());
    }
}
