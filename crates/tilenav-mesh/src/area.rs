//! Area id manipulation: erosion, inclusion filtering and dynamic area
//! modifiers.
//!
//! Erosion and the inclusion filter run during the full voxel pipeline;
//! modifier marking runs on already-built layers, which is what makes
//! geometry-unchanged rebuilds cheap.

use tilenav_common::{point_in_convex_poly_xy, TileBounds};

use crate::{
    AreaModifier, CompactHeightfield, Heightfield, LayerGrid, ModifierShape, NavMeshConfig,
    AREA_NULL, EMPTY_CELL,
};

/// Shrinks the walkable area inward by `radius` cells so polygon borders
/// stay at least an agent radius away from obstructions. No-op for a
/// non-positive radius.
pub fn erode_walkable_area(chf: &mut CompactHeightfield, radius: i32) {
    if radius <= 0 {
        return;
    }
    let w = chf.width;
    let h = chf.height;
    // Distance to the nearest boundary, in half-cell units.
    let mut dist = vec![255u8; chf.spans.len()];

    for y in 0..h {
        for x in 0..w {
            let cell = chf.cells[(x + y * w) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                if chf.spans[i].area == AREA_NULL {
                    dist[i] = 0;
                    continue;
                }
                let open = (0..4).all(|dir| {
                    chf.neighbor(x, y, i, dir)
                        .map(|n| chf.spans[n].area != AREA_NULL)
                        .unwrap_or(false)
                });
                if !open {
                    dist[i] = 0;
                }
            }
        }
    }

    let relax = |dist: &mut Vec<u8>, i: usize, n: usize, cost: u8| {
        let nd = dist[n].saturating_add(cost);
        if nd < dist[i] {
            dist[i] = nd;
        }
    };

    // Forward pass: west and south neighbors plus their diagonals.
    for y in 0..h {
        for x in 0..w {
            let cell = chf.cells[(x + y * w) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                if let Some(n) = chf.neighbor(x, y, i, 0) {
                    relax(&mut dist, i, n, 2);
                    if let Some(nn) = chf.neighbor(x - 1, y, n, 3) {
                        relax(&mut dist, i, nn, 3);
                    }
                }
                if let Some(n) = chf.neighbor(x, y, i, 3) {
                    relax(&mut dist, i, n, 2);
                    if let Some(nn) = chf.neighbor(x, y - 1, n, 2) {
                        relax(&mut dist, i, nn, 3);
                    }
                }
            }
        }
    }
    // Backward pass: east and north neighbors plus their diagonals.
    for y in (0..h).rev() {
        for x in (0..w).rev() {
            let cell = chf.cells[(x + y * w) as usize];
            for i in cell.index..cell.index + cell.count {
                let i = i as usize;
                if let Some(n) = chf.neighbor(x, y, i, 2) {
                    relax(&mut dist, i, n, 2);
                    if let Some(nn) = chf.neighbor(x + 1, y, n, 1) {
                        relax(&mut dist, i, nn, 3);
                    }
                }
                if let Some(n) = chf.neighbor(x, y, i, 1) {
                    relax(&mut dist, i, n, 2);
                    if let Some(nn) = chf.neighbor(x, y + 1, n, 0) {
                        relax(&mut dist, i, nn, 3);
                    }
                }
            }
        }
    }

    let threshold = (radius * 2).min(255) as u8;
    for (i, d) in dist.iter().enumerate() {
        if *d < threshold {
            chf.spans[i].area = AREA_NULL;
        }
    }
}

/// Nulls every span whose surface falls outside all inclusion volumes.
///
/// Volumes are expanded horizontally by `expand` world units so erosion
/// does not read the volume edge as a cliff. A span inside any single
/// volume survives.
pub fn filter_inclusion_bounds(hf: &mut Heightfield, volumes: &[TileBounds], expand: f32) {
    if volumes.is_empty() {
        return;
    }
    let expanded: Vec<TileBounds> = volumes.iter().map(|v| v.expanded(expand)).collect();
    for y in 0..hf.height {
        for x in 0..hf.width {
            let cx = hf.bmin.x + (x as f32 + 0.5) * hf.cs;
            let cy = hf.bmin.y + (y as f32 + 0.5) * hf.cs;
            let bmin_z = hf.bmin.z;
            let ch = hf.ch;
            for s in hf.column_mut(x, y).iter_mut() {
                if s.area == AREA_NULL {
                    continue;
                }
                let top = bmin_z + s.smax as f32 * ch;
                let inside = expanded.iter().any(|v| {
                    cx >= v.min.x
                        && cx <= v.max.x
                        && cy >= v.min.y
                        && cy <= v.max.y
                        && top >= v.min.z
                        && top <= v.max.z
                });
                if !inside {
                    s.area = AREA_NULL;
                }
            }
        }
    }
}

/// True when the modifier footprint covers the cell center.
fn footprint_covers(shape: &ModifierShape, cx: f32, cy: f32) -> bool {
    match shape {
        ModifierShape::Box { min, max } => {
            cx >= min.x && cx <= max.x && cy >= min.y && cy <= max.y
        }
        ModifierShape::Cylinder { center, radius, .. } => {
            let dx = cx - center.x;
            let dy = cy - center.y;
            dx * dx + dy * dy <= radius * radius
        }
        ModifierShape::Convex { verts, .. } => point_in_convex_poly_xy(cx, cy, verts),
    }
}

/// Vertical range a modifier affects, as floor heights in world units.
fn vertical_range(shape: &ModifierShape, expand_down: f32) -> (f32, f32) {
    let (lo, hi) = match shape {
        ModifierShape::Box { min, max } => (min.z, max.z),
        ModifierShape::Cylinder { center, height, .. } => (center.z, center.z + height),
        ModifierShape::Convex { z_min, z_max, .. } => (*z_min, *z_max),
    };
    (lo - expand_down, hi)
}

/// Applies one area modifier to a built layer.
///
/// Overwrites the area id of every occupied cell whose center lies in
/// the footprint and whose floor falls in the vertical range. With
/// `replace_area` set, only cells currently carrying that id change.
/// When `expand_height` is set the range is extended downward by the
/// agent height, so floors the volume hovers over are still affected.
pub fn mark_modifier(grid: &mut LayerGrid, modifier: &AreaModifier, config: &NavMeshConfig) {
    let expand_down = if modifier.expand_height {
        config.walkable_height as f32 * config.cell_height
    } else {
        0.0
    };
    let (z_lo, z_hi) = vertical_range(&modifier.shape, expand_down);

    for y in 0..grid.height {
        for x in 0..grid.width {
            let idx = grid.idx(x, y);
            let h = grid.heights[idx];
            if h == EMPTY_CELL {
                continue;
            }
            if let Some(prev) = modifier.replace_area {
                if grid.areas[idx] != prev {
                    continue;
                }
            }
            let cx = grid.bmin.x + (x as f32 + 0.5) * grid.cs;
            let cy = grid.bmin.y + (y as f32 + 0.5) * grid.cs;
            if !footprint_covers(&modifier.shape, cx, cy) {
                continue;
            }
            let floor = grid.bmin.z + h as f32 * grid.ch;
            if floor >= z_lo && floor <= z_hi {
                grid.areas[idx] = modifier.area;
            }
        }
    }
}

/// Applies modifiers in ascending priority order; ties keep the caller's
/// ordering, so the highest priority lands last and wins.
pub fn mark_modifiers(grid: &mut LayerGrid, modifiers: &[AreaModifier], config: &NavMeshConfig) {
    let mut order: Vec<usize> = (0..modifiers.len()).collect();
    order.sort_by_key(|&i| modifiers[i].priority);
    for i in order {
        mark_modifier(grid, &modifiers[i], config);
    }
}
