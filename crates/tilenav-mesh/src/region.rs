//! Region partitioning of a walkable layer.
//!
//! Labels the cells of a [`LayerGrid`] with region ids so that each region
//! traces to a simple contour. Three interchangeable strategies: a single
//! monotone sweep, a distance-field watershed, and a chunked monotone sweep
//! with better locality.

use log::debug;
use tilenav_common::{Error, Result};

use crate::{LayerGrid, NavMeshConfig, Partitioning, EMPTY_CELL};

/// Chunk edge length for [`Partitioning::ChunkyMonotone`], in cells.
const CHUNK_SIZE: i32 = 16;

/// Per-cell region labels for one layer. Id 0 means "no region".
#[derive(Debug, Clone)]
pub struct RegionSet {
    pub width: i32,
    pub height: i32,
    /// Region id per cell, `0` for unassigned cells. Ids are contiguous
    /// in `1..=count`.
    pub ids: Vec<u16>,
    pub count: u16,
}

impl RegionSet {
    #[inline]
    pub fn id(&self, x: i32, y: i32) -> u16 {
        self.ids[(x + y * self.width) as usize]
    }
}

/// True when an agent can step between two cells of the layer. Cells
/// whose area was nulled by erosion or a modifier do not participate.
#[inline]
fn connected(grid: &LayerGrid, climb: i32, a: usize, b: usize) -> bool {
    let ha = grid.heights[a];
    let hb = grid.heights[b];
    if ha == EMPTY_CELL || hb == EMPTY_CELL || grid.areas[a] == 0 || grid.areas[b] == 0 {
        return false;
    }
    (ha as i32 - hb as i32).abs() <= climb
}

/// True when `(x, y)` lies in the partitionable core of the grid.
#[inline]
fn in_core(grid: &LayerGrid, border: i32, x: i32, y: i32) -> bool {
    x >= border && y >= border && x < grid.width - border && y < grid.height - border
}

#[inline]
fn walkable(grid: &LayerGrid, border: i32, x: i32, y: i32) -> bool {
    in_core(grid, border, x, y)
        && grid.heights[grid.idx(x, y)] != EMPTY_CELL
        && grid.areas[grid.idx(x, y)] != 0
}

/// Partitions a layer into regions using the strategy from `config`.
///
/// `border` cells around the grid edge are excluded so region boundaries
/// fall exactly on the tile core. Small regions below `min_region_area`
/// are merged into a neighbor while the combined size stays under
/// `merge_region_area`, otherwise discarded.
pub fn build_regions(
    grid: &LayerGrid,
    config: &NavMeshConfig,
    border: i32,
) -> Result<RegionSet> {
    if border < 0 || border * 2 >= grid.width.min(grid.height) {
        return Err(Error::InvalidData(format!(
            "border {border} does not fit a {}x{} grid",
            grid.width, grid.height
        )));
    }

    let climb = config.walkable_climb;
    let mut ids = vec![0u16; (grid.width * grid.height) as usize];
    let mut count: u16 = 0;

    match config.partitioning {
        Partitioning::Monotone => {
            monotone_sweep(
                grid,
                climb,
                border,
                border,
                grid.width - border,
                grid.height - border,
                &mut ids,
                &mut count,
            )?;
        }
        Partitioning::ChunkyMonotone => {
            let mut y0 = border;
            while y0 < grid.height - border {
                let y1 = (y0 + CHUNK_SIZE).min(grid.height - border);
                let mut x0 = border;
                while x0 < grid.width - border {
                    let x1 = (x0 + CHUNK_SIZE).min(grid.width - border);
                    monotone_sweep(grid, climb, x0, y0, x1, y1, &mut ids, &mut count)?;
                    x0 = x1;
                }
                y0 = y1;
            }
        }
        Partitioning::Watershed => {
            count = watershed(grid, climb, border, &mut ids)?;
        }
    }

    let raw = count;
    let count = merge_and_compact(grid, config, climb, &mut ids, count);
    debug!(
        "layer {} of tile ({}, {}): {:?} produced {raw} regions, {count} after merge",
        grid.layer, grid.tile_x, grid.tile_y, config.partitioning
    );
    Ok(RegionSet {
        width: grid.width,
        height: grid.height,
        ids,
        count,
    })
}

/// Monotone row sweep over a sub-rectangle of the grid.
///
/// Each row is split into runs of horizontally connected cells; a run
/// adopts the region below it when that region is sampled by this run
/// alone, which keeps every region x-monotone.
#[allow(clippy::too_many_arguments)]
fn monotone_sweep(
    grid: &LayerGrid,
    climb: i32,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
    ids: &mut [u16],
    count: &mut u16,
) -> Result<()> {
    const NO_NEI: u16 = u16::MAX;

    struct Sweep {
        /// Candidate region in the previous row, `NO_NEI` on conflict.
        nei: u16,
        /// Cells of this run connected to `nei`.
        samples: u32,
    }

    for y in y0..y1 {
        let mut sweeps: Vec<Sweep> = Vec::new();
        let mut sweep_of = vec![u16::MAX; (x1 - x0) as usize];
        // Samples per previous-row region, to detect exclusive adoption.
        let mut prev_samples: std::collections::HashMap<u16, u32> =
            std::collections::HashMap::new();

        for x in x0..x1 {
            let idx = grid.idx(x, y);
            if grid.heights[idx] == EMPTY_CELL || grid.areas[idx] == 0 {
                continue;
            }
            let start_new = x == x0
                || grid.heights[grid.idx(x - 1, y)] == EMPTY_CELL
                || !connected(grid, climb, grid.idx(x - 1, y), idx);
            if start_new {
                sweeps.push(Sweep {
                    nei: NO_NEI,
                    samples: 0,
                });
            }
            let si = sweeps.len() - 1;
            sweep_of[(x - x0) as usize] = si as u16;

            if y > y0 {
                let below = grid.idx(x, y - 1);
                if connected(grid, climb, below, idx) {
                    let rid = ids[below];
                    if rid != 0 {
                        let s = &mut sweeps[si];
                        if s.samples == 0 {
                            s.nei = rid;
                        } else if s.nei != rid {
                            s.nei = NO_NEI;
                        }
                        s.samples += 1;
                        *prev_samples.entry(rid).or_insert(0) += 1;
                    }
                }
            }
        }

        // Resolve run ids, then paint the row.
        let mut run_ids = Vec::with_capacity(sweeps.len());
        for s in &sweeps {
            let adopt = s.nei != NO_NEI
                && s.samples > 0
                && prev_samples.get(&s.nei).copied() == Some(s.samples);
            if adopt {
                run_ids.push(s.nei);
            } else {
                if *count == u16::MAX {
                    return Err(Error::OutOfMemory("region id space exhausted".to_string()));
                }
                *count += 1;
                run_ids.push(*count);
            }
        }
        for x in x0..x1 {
            let si = sweep_of[(x - x0) as usize];
            if si != u16::MAX {
                ids[grid.idx(x, y)] = run_ids[si as usize];
            }
        }
    }
    Ok(())
}

/// Watershed partitioning: flood regions outward from distance-field
/// maxima so boundaries follow the medial axis.
fn watershed(grid: &LayerGrid, climb: i32, border: i32, ids: &mut [u16]) -> Result<u16> {
    let w = grid.width;
    let h = grid.height;
    let dist = distance_field(grid, climb, border);
    let max_dist = dist.iter().copied().filter(|&d| d != u16::MAX).max().unwrap_or(0);

    let mut count: u16 = 0;
    let mut level = max_dist & !1;
    loop {
        // Grow existing regions into newly admitted cells.
        loop {
            let mut changed = false;
            for y in border..h - border {
                for x in border..w - border {
                    let idx = grid.idx(x, y);
                    if ids[idx] != 0 || dist[idx] == u16::MAX || dist[idx] < level {
                        continue;
                    }
                    for dir in 0..4 {
                        let nx = x + tilenav_common::dir_offset_x(dir);
                        let ny = y + tilenav_common::dir_offset_y(dir);
                        if !walkable(grid, border, nx, ny) {
                            continue;
                        }
                        let nidx = grid.idx(nx, ny);
                        if ids[nidx] != 0 && connected(grid, climb, idx, nidx) {
                            ids[idx] = ids[nidx];
                            changed = true;
                            break;
                        }
                    }
                }
            }
            if !changed {
                break;
            }
        }

        // Seed new regions in the still-unassigned cells of this level.
        for y in border..h - border {
            for x in border..w - border {
                let idx = grid.idx(x, y);
                if ids[idx] != 0 || dist[idx] == u16::MAX || dist[idx] < level {
                    continue;
                }
                if count == u16::MAX {
                    return Err(Error::OutOfMemory("region id space exhausted".to_string()));
                }
                count += 1;
                flood_region(grid, climb, border, &dist, level, idx, count, ids);
            }
        }

        if level == 0 {
            break;
        }
        level = level.saturating_sub(2);
    }
    Ok(count)
}

/// Flood fill a new region over connected cells at or above `level`.
fn flood_region(
    grid: &LayerGrid,
    climb: i32,
    border: i32,
    dist: &[u16],
    level: u16,
    seed: usize,
    rid: u16,
    ids: &mut [u16],
) {
    let w = grid.width;
    let mut stack = vec![seed];
    ids[seed] = rid;
    while let Some(idx) = stack.pop() {
        let x = idx as i32 % w;
        let y = idx as i32 / w;
        for dir in 0..4 {
            let nx = x + tilenav_common::dir_offset_x(dir);
            let ny = y + tilenav_common::dir_offset_y(dir);
            if !walkable(grid, border, nx, ny) {
                continue;
            }
            let nidx = grid.idx(nx, ny);
            if ids[nidx] == 0
                && dist[nidx] != u16::MAX
                && dist[nidx] >= level
                && connected(grid, climb, idx, nidx)
            {
                ids[nidx] = rid;
                stack.push(nidx);
            }
        }
    }
}

/// Two-pass chamfer distance to the nearest boundary cell, in half-cell
/// units (orthogonal step 2, diagonal step 3). `u16::MAX` marks cells
/// outside the walkable core.
fn distance_field(grid: &LayerGrid, climb: i32, border: i32) -> Vec<u16> {
    let w = grid.width;
    let h = grid.height;
    let mut dist = vec![u16::MAX; (w * h) as usize];

    for y in border..h - border {
        for x in border..w - border {
            let idx = grid.idx(x, y);
            if grid.heights[idx] == EMPTY_CELL || grid.areas[idx] == 0 {
                continue;
            }
            let mut boundary = false;
            for dir in 0..4 {
                let nx = x + tilenav_common::dir_offset_x(dir);
                let ny = y + tilenav_common::dir_offset_y(dir);
                if !walkable(grid, border, nx, ny)
                    || !connected(grid, climb, idx, grid.idx(nx, ny))
                {
                    boundary = true;
                    break;
                }
            }
            dist[idx] = if boundary { 0 } else { u16::MAX - 1 };
        }
    }

    let relax = |dist: &mut Vec<u16>, idx: usize, nidx: usize, cost: u16| {
        if dist[nidx] != u16::MAX && dist[nidx].saturating_add(cost) < dist[idx] {
            dist[idx] = dist[nidx] + cost;
        }
    };

    // Forward pass: west, south, and the two south diagonals.
    for y in border..h - border {
        for x in border..w - border {
            let idx = grid.idx(x, y);
            if dist[idx] == u16::MAX {
                continue;
            }
            for (dx, dy, cost) in [(-1, 0, 2), (0, -1, 2), (-1, -1, 3), (1, -1, 3)] {
                if walkable(grid, border, x + dx, y + dy) {
                    relax(&mut dist, idx, grid.idx(x + dx, y + dy), cost);
                }
            }
        }
    }
    // Backward pass mirrors it.
    for y in (border..h - border).rev() {
        for x in (border..w - border).rev() {
            let idx = grid.idx(x, y);
            if dist[idx] == u16::MAX {
                continue;
            }
            for (dx, dy, cost) in [(1, 0, 2), (0, 1, 2), (1, 1, 3), (-1, 1, 3)] {
                if walkable(grid, border, x + dx, y + dy) {
                    relax(&mut dist, idx, grid.idx(x + dx, y + dy), cost);
                }
            }
        }
    }
    dist
}

/// Merges undersized regions into neighbors and compacts ids to a
/// contiguous `1..=count` range.
fn merge_and_compact(
    grid: &LayerGrid,
    config: &NavMeshConfig,
    climb: i32,
    ids: &mut [u16],
    count: u16,
) -> u16 {
    if count == 0 {
        return 0;
    }
    let n = count as usize + 1;
    let mut area = vec![0u32; n];
    let mut adjacency: Vec<Vec<u16>> = vec![Vec::new(); n];

    for y in 0..grid.height {
        for x in 0..grid.width {
            let idx = grid.idx(x, y);
            let rid = ids[idx];
            if rid == 0 {
                continue;
            }
            area[rid as usize] += 1;
            // East and north are enough to see every adjacent pair once.
            for dir in [1usize, 2] {
                let nx = x + tilenav_common::dir_offset_x(dir);
                let ny = y + tilenav_common::dir_offset_y(dir);
                if nx >= grid.width || ny >= grid.height {
                    continue;
                }
                let nidx = grid.idx(nx, ny);
                let nrid = ids[nidx];
                if nrid != 0 && nrid != rid && connected(grid, climb, idx, nidx) {
                    if !adjacency[rid as usize].contains(&nrid) {
                        adjacency[rid as usize].push(nrid);
                    }
                    if !adjacency[nrid as usize].contains(&rid) {
                        adjacency[nrid as usize].push(rid);
                    }
                }
            }
        }
    }

    // Union-find over region ids; unions accumulate area.
    let mut parent: Vec<u16> = (0..n as u16).collect();
    fn find(parent: &mut [u16], mut r: u16) -> u16 {
        while parent[r as usize] != r {
            parent[r as usize] = parent[parent[r as usize] as usize];
            r = parent[r as usize];
        }
        r
    }

    let mut order: Vec<u16> = (1..n as u16).collect();
    order.sort_by_key(|&r| area[r as usize]);

    let mut discarded = vec![false; n];
    for r in order {
        let root = find(&mut parent, r);
        if root != r || discarded[root as usize] {
            continue;
        }
        if area[root as usize] >= config.min_region_area as u32 {
            continue;
        }
        // Smallest mergeable neighbor keeps merged regions compact.
        let mut best: Option<u16> = None;
        for &nb in &adjacency[r as usize] {
            let nb = find(&mut parent, nb);
            if nb == root || discarded[nb as usize] {
                continue;
            }
            let combined = area[root as usize] + area[nb as usize];
            if combined > config.merge_region_area as u32 {
                continue;
            }
            if best.map_or(true, |b| area[nb as usize] < area[b as usize]) {
                best = Some(nb);
            }
        }
        match best {
            Some(nb) => {
                parent[root as usize] = nb;
                area[nb as usize] += area[root as usize];
                let extra = adjacency[root as usize].clone();
                for e in extra {
                    if !adjacency[nb as usize].contains(&e) {
                        adjacency[nb as usize].push(e);
                    }
                }
            }
            None => discarded[root as usize] = true,
        }
    }

    // Compact surviving roots into 1..=new_count and rewrite cells.
    let mut remap = vec![0u16; n];
    let mut new_count: u16 = 0;
    for r in 1..n as u16 {
        let root = find(&mut parent, r);
        if discarded[root as usize] {
            continue;
        }
        if remap[root as usize] == 0 {
            new_count += 1;
            remap[root as usize] = new_count;
        }
        remap[r as usize] = remap[root as usize];
    }
    for id in ids.iter_mut() {
        *id = remap[*id as usize];
    }
    new_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AREA_WALKABLE, EMPTY_CELL};
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

    fn config(p: Partitioning) -> NavMeshConfig {
        NavMeshConfig {
            partitioning: p,
            min_region_area: 4,
            merge_region_area: 100,
            walkable_climb: 1,
            ..NavMeshConfig::default()
        }
    }

    fn coverage(g: &LayerGrid, rs: &RegionSet) -> bool {
        (0..g.heights.len()).all(|i| (g.heights[i] != EMPTY_CELL) == (rs.ids[i] != 0))
    }

    #[test]
    fn test_single_plate_one_region() {
        for p in [
            Partitioning::Monotone,
            Partitioning::Watershed,
            Partitioning::ChunkyMonotone,
        ] {
            let mut g = grid(10, 10);
            fill(&mut g, 0, 0, 10, 10, 5);
            let rs = build_regions(&g, &config(p), 0).unwrap();
            assert!(rs.count >= 1, "{p:?}");
            assert!(coverage(&g, &rs), "{p:?}");
        }
    }

    #[test]
    fn test_disconnected_plates_get_distinct_regions() {
        let mut g = grid(12, 6);
        fill(&mut g, 0, 0, 5, 6, 5);
        fill(&mut g, 7, 0, 12, 6, 5);
        let rs = build_regions(&g, &config(Partitioning::Monotone), 0).unwrap();
        assert_eq!(rs.count, 2);
        assert_ne!(rs.id(0, 0), rs.id(11, 0));
    }

    #[test]
    fn test_cliff_splits_regions() {
        // Same layer, but a 10-cell step the agent cannot climb.
        let mut g = grid(10, 4);
        fill(&mut g, 0, 0, 5, 4, 5);
        fill(&mut g, 5, 0, 10, 4, 15);
        let rs = build_regions(&g, &config(Partitioning::Monotone), 0).unwrap();
        assert_eq!(rs.count, 2);
    }

    #[test]
    fn test_small_region_discarded() {
        let mut g = grid(12, 8);
        fill(&mut g, 0, 0, 6, 8, 5);
        // Isolated 1x2 sliver, below min_region_area and unmergeable.
        fill(&mut g, 10, 3, 11, 5, 5);
        let rs = build_regions(&g, &config(Partitioning::Monotone), 0).unwrap();
        assert_eq!(rs.count, 1);
        assert_eq!(rs.id(10, 3), 0);
    }

    #[test]
    fn test_small_region_merges_into_neighbor() {
        let mut g = grid(10, 8);
        fill(&mut g, 0, 0, 10, 8, 5);
        // A one-cell step still within climb keeps the plate connected but
        // the monotone sweep may split it; merged output must be whole.
        fill(&mut g, 4, 0, 6, 8, 6);
        let cfg = config(Partitioning::Monotone);
        let rs = build_regions(&g, &cfg, 0).unwrap();
        assert!(coverage(&g, &rs));
    }

    #[test]
    fn test_border_cells_stay_unassigned() {
        let mut g = grid(12, 12);
        fill(&mut g, 0, 0, 12, 12, 5);
        let rs = build_regions(&g, &config(Partitioning::Watershed), 2).unwrap();
        assert_eq!(rs.id(0, 0), 0);
        assert_eq!(rs.id(1, 11), 0);
        assert_ne!(rs.id(6, 6), 0);
    }

    #[test]
    fn test_ids_are_contiguous() {
        let mut g = grid(20, 20);
        fill(&mut g, 0, 0, 20, 20, 5);
        fill(&mut g, 9, 0, 11, 20, 30); // wall splits the plate
        for x in 9..11 {
            for y in 0..20 {
                let idx = g.idx(x, y);
                g.heights[idx] = EMPTY_CELL;
                g.areas[idx] = 0;
            }
        }
        let rs = build_regions(&g, &config(Partitioning::ChunkyMonotone), 0).unwrap();
        let max = rs.ids.iter().copied().max().unwrap();
        assert_eq!(max, rs.count);
        for id in 1..=rs.count {
            assert!(rs.ids.contains(&id));
        }
    }
}
