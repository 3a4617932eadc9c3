//! Convex polygon mesh construction from simplified contours.
//!
//! Each contour is ear-clipped into triangles, triangles are greedily
//! merged into convex polygons of at most `max_verts_per_poly` vertices,
//! and polygon adjacency is resolved through an edge map.

use std::collections::HashMap;

use glam::Vec3;
use log::debug;
use tilenav_common::{area2, collinear, left, left_on, Error, Result};

use crate::{ContourSet, LayerGrid, NavMeshConfig};

/// Null polygon vertex/neighbor index.
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Convex polygon mesh of one layer, in cell coordinates relative to the
/// tile core (border removed).
#[derive(Debug, Clone)]
pub struct PolyMesh {
    /// Vertex positions as (x, y, z) cell coordinates.
    pub verts: Vec<[u16; 3]>,
    /// Polygon data, `2 * nvp` entries per polygon: `nvp` vertex indices
    /// then `nvp` neighbor polygon indices, both `MESH_NULL_IDX` padded.
    /// A neighbor entry is the adjacent polygon for the edge starting at
    /// the same slot.
    pub polys: Vec<u16>,
    /// Source region id per polygon.
    pub regions: Vec<u16>,
    /// Area id per polygon.
    pub areas: Vec<u8>,
    pub nvp: usize,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
}

impl PolyMesh {
    #[inline]
    pub fn poly_count(&self) -> usize {
        self.regions.len()
    }

    /// Vertex indices of polygon `p`, without the null padding.
    pub fn poly_verts(&self, p: usize) -> &[u16] {
        let poly = &self.polys[p * self.nvp * 2..p * self.nvp * 2 + self.nvp];
        let n = poly.iter().position(|&v| v == MESH_NULL_IDX).unwrap_or(self.nvp);
        &poly[..n]
    }

    /// Neighbor entries of polygon `p` (parallel to [`PolyMesh::poly_verts`]).
    pub fn poly_neighbors(&self, p: usize) -> &[u16] {
        let n = self.poly_verts(p).len();
        &self.polys[p * self.nvp * 2 + self.nvp..p * self.nvp * 2 + self.nvp + n]
    }

    /// World-space position of vertex `i`.
    pub fn vertex_pos(&self, i: usize) -> Vec3 {
        let v = self.verts[i];
        Vec3::new(
            self.bmin.x + v[0] as f32 * self.cs,
            self.bmin.y + v[1] as f32 * self.cs,
            self.bmin.z + v[2] as f32 * self.ch,
        )
    }
}

/// Builds the convex polygon mesh for one layer.
pub fn build_poly_mesh(
    cset: &ContourSet,
    grid: &LayerGrid,
    config: &NavMeshConfig,
) -> Result<PolyMesh> {
    let nvp = config.max_verts_per_poly as usize;
    let border = cset.border;

    let mut verts: Vec<[u16; 3]> = Vec::new();
    let mut vert_map: HashMap<(u16, u16), u16> = HashMap::new();
    let mut polys: Vec<Vec<u16>> = Vec::new();
    let mut regions: Vec<u16> = Vec::new();
    let mut areas: Vec<u8> = Vec::new();

    for contour in &cset.contours {
        if contour.verts.len() < 3 {
            continue;
        }
        // Contour points in core-relative integer coordinates.
        let pts: Vec<[i32; 2]> = contour
            .verts
            .iter()
            .map(|v| [v.x - border, v.y - border])
            .collect();
        let tris = triangulate(&pts);
        if tris.is_empty() {
            debug!(
                "region {}: triangulation produced no triangles, contour skipped",
                contour.region
            );
            continue;
        }

        // Global vertex indices for this contour, deduplicated on (x, y).
        let mut global = Vec::with_capacity(pts.len());
        for (p, v) in pts.iter().zip(&contour.verts) {
            if p[0] < 0 || p[1] < 0 || p[0] > u16::MAX as i32 || p[1] > u16::MAX as i32 {
                return Err(Error::InvalidData(format!(
                    "contour vertex out of range: ({}, {})",
                    p[0], p[1]
                )));
            }
            let key = (p[0] as u16, p[1] as u16);
            let idx = match vert_map.get(&key) {
                Some(&i) => i,
                None => {
                    if verts.len() >= MESH_NULL_IDX as usize {
                        return Err(Error::CapacityExceeded(
                            "polygon mesh vertex index space exhausted".to_string(),
                        ));
                    }
                    let i = verts.len() as u16;
                    verts.push([key.0, key.1, v.z]);
                    vert_map.insert(key, i);
                    i
                }
            };
            global.push(idx);
        }

        // Triangles first, merged below.
        let mut contour_polys: Vec<Vec<u16>> = tris
            .iter()
            .filter(|t| {
                // Drop degenerate slivers the fallback clipping may emit.
                !collinear(pts[t[0]], pts[t[1]], pts[t[2]])
            })
            .map(|t| vec![global[t[0]], global[t[1]], global[t[2]]])
            .collect();
        merge_polys(&mut contour_polys, &verts, nvp);

        for poly in contour_polys {
            polys.push(poly);
            regions.push(contour.region);
            areas.push(contour.area);
        }
    }

    if polys.len() >= MESH_NULL_IDX as usize {
        return Err(Error::CapacityExceeded(format!(
            "polygon count {} exceeds the index space",
            polys.len()
        )));
    }

    let packed = pack_polys(&polys, nvp)?;
    Ok(PolyMesh {
        verts,
        polys: packed,
        regions,
        areas,
        nvp,
        bmin: Vec3::new(
            grid.bmin.x + border as f32 * grid.cs,
            grid.bmin.y + border as f32 * grid.cs,
            grid.bmin.z,
        ),
        bmax: Vec3::new(
            grid.bmax.x - border as f32 * grid.cs,
            grid.bmax.y - border as f32 * grid.cs,
            grid.bmax.z,
        ),
        cs: grid.cs,
        ch: grid.ch,
    })
}

// Integer geometry predicates on a polygon vertex loop, following the
// classic computational-geometry formulation.

fn between(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[1] <= c[1] && c[1] <= b[1]) || (a[1] >= c[1] && c[1] >= b[1])
    }
}

fn intersect_prop(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }
    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

fn intersect(a: [i32; 2], b: [i32; 2], c: [i32; 2], d: [i32; 2]) -> bool {
    intersect_prop(a, b, c, d)
        || between(a, b, c)
        || between(a, b, d)
        || between(c, d, a)
        || between(c, d, b)
}

/// Ear-clipping triangulation of a simple CCW polygon. Returns triangles
/// as index triples into `pts`. Falls back to clipping the flattest
/// corner when no strict ear remains, so bridged hole loops still
/// triangulate.
fn triangulate(pts: &[[i32; 2]]) -> Vec<[usize; 3]> {
    let n = pts.len();
    if n < 3 {
        return Vec::new();
    }
    let mut indices: Vec<usize> = (0..n).collect();
    let mut tris = Vec::with_capacity(n - 2);

    let diagonal = |indices: &[usize], i: usize, j: usize| -> bool {
        in_cone(pts, indices, i, j) && diagonalie(pts, indices, i, j)
    };

    while indices.len() > 3 {
        let m = indices.len();
        let mut best: Option<(usize, i64)> = None;
        for i in 0..m {
            let j = (i + 2) % m;
            if diagonal(&indices, i, j) {
                let p = pts[indices[i]];
                let q = pts[indices[j]];
                let dx = (q[0] - p[0]) as i64;
                let dy = (q[1] - p[1]) as i64;
                let len = dx * dx + dy * dy;
                if best.map_or(true, |(_, bl)| len < bl) {
                    best = Some((i, len));
                }
            }
        }
        let ear = match best {
            Some((i, _)) => i,
            None => {
                // Degenerate loop; clip the flattest corner to make
                // progress.
                debug!("no ear in a {m}-vertex loop, clipping the flattest corner");
                let mut flattest = 0;
                let mut flat_area = i64::MAX;
                for i in 0..m {
                    let a =
                        area2(pts[indices[i]], pts[indices[(i + 1) % m]], pts[indices[(i + 2) % m]])
                            .abs();
                    if a < flat_area {
                        flat_area = a;
                        flattest = i;
                    }
                }
                flattest
            }
        };
        let mid = (ear + 1) % indices.len();
        tris.push([indices[ear], indices[mid], indices[(ear + 2) % indices.len()]]);
        indices.remove(mid);
    }
    tris.push([indices[0], indices[1], indices[2]]);
    tris
}

fn in_cone(pts: &[[i32; 2]], indices: &[usize], i: usize, j: usize) -> bool {
    let m = indices.len();
    let a = pts[indices[i]];
    let b = pts[indices[j]];
    let a_prev = pts[indices[(i + m - 1) % m]];
    let a_next = pts[indices[(i + 1) % m]];
    if left_on(a_prev, a, a_next) {
        left(a, b, a_prev) && left(b, a, a_next)
    } else {
        !(left_on(a, b, a_next) && left_on(b, a, a_prev))
    }
}

fn diagonalie(pts: &[[i32; 2]], indices: &[usize], i: usize, j: usize) -> bool {
    let m = indices.len();
    let d0 = pts[indices[i]];
    let d1 = pts[indices[j]];
    for k in 0..m {
        let k1 = (k + 1) % m;
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let e0 = pts[indices[k]];
        let e1 = pts[indices[k1]];
        if (d0 == e0) || (d0 == e1) || (d1 == e0) || (d1 == e1) {
            continue;
        }
        if intersect(d0, d1, e0, e1) {
            return false;
        }
    }
    true
}

/// Greedily merges polygons along their longest shared edge while the
/// result stays convex and within `nvp` vertices.
fn merge_polys(polys: &mut Vec<Vec<u16>>, verts: &[[u16; 3]], nvp: usize) {
    let pt = |v: u16| -> [i32; 2] {
        let p = verts[v as usize];
        [p[0] as i32, p[1] as i32]
    };

    loop {
        let mut best: Option<(usize, usize, usize, usize, i64)> = None;
        for a in 0..polys.len() {
            for b in a + 1..polys.len() {
                if let Some((ea, eb)) = shared_edge(&polys[a], &polys[b]) {
                    if polys[a].len() + polys[b].len() - 2 > nvp {
                        continue;
                    }
                    let pa = &polys[a];
                    let pb = &polys[b];
                    let na = pa.len();
                    let nb = pb.len();
                    // Convexity at both junction corners.
                    let va_prev = pa[(ea + na - 1) % na];
                    let va = pa[ea];
                    let va_after = pb[(eb + 2) % nb];
                    let vb = pa[(ea + 1) % na];
                    let vb_after = pa[(ea + 2) % na];
                    let vb_before = pb[(eb + nb - 1) % nb];
                    if !left_on(pt(va_prev), pt(va), pt(va_after))
                        || !left_on(pt(vb_before), pt(vb), pt(vb_after))
                    {
                        continue;
                    }
                    let d0 = pt(va);
                    let d1 = pt(vb);
                    let dx = (d1[0] - d0[0]) as i64;
                    let dy = (d1[1] - d0[1]) as i64;
                    let len = dx * dx + dy * dy;
                    if best.map_or(true, |(.., bl)| len > bl) {
                        best = Some((a, b, ea, eb, len));
                    }
                }
            }
        }
        let Some((a, b, ea, eb, _)) = best else { break };

        // Splice B into A, dropping the shared edge.
        let pa = polys[a].clone();
        let pb = polys[b].clone();
        let na = pa.len();
        let nb = pb.len();
        let mut merged = Vec::with_capacity(na + nb - 2);
        for k in 0..na - 1 {
            merged.push(pa[(ea + 1 + k) % na]);
        }
        for k in 0..nb - 1 {
            merged.push(pb[(eb + 1 + k) % nb]);
        }
        polys[a] = merged;
        polys.swap_remove(b);
    }
}

/// Finds a directed edge of `a` whose reverse appears in `b`.
fn shared_edge(a: &[u16], b: &[u16]) -> Option<(usize, usize)> {
    for (i, &va) in a.iter().enumerate() {
        let vb = a[(i + 1) % a.len()];
        for (j, &wb) in b.iter().enumerate() {
            let wa = b[(j + 1) % b.len()];
            if va == wa && vb == wb {
                return Some((i, j));
            }
        }
    }
    None
}

/// Packs polygons into the fixed-width layout and resolves neighbors.
fn pack_polys(polys: &[Vec<u16>], nvp: usize) -> Result<Vec<u16>> {
    let mut packed = vec![MESH_NULL_IDX; polys.len() * nvp * 2];
    for (p, poly) in polys.iter().enumerate() {
        if poly.len() > nvp {
            return Err(Error::CapacityExceeded(format!(
                "polygon with {} vertices exceeds the limit {nvp}",
                poly.len()
            )));
        }
        for (k, &v) in poly.iter().enumerate() {
            packed[p * nvp * 2 + k] = v;
        }
    }

    // Edge map: directed edge -> (poly, slot). A matching reverse edge
    // links two polygons.
    let mut edges: HashMap<(u16, u16), (usize, usize)> = HashMap::new();
    for (p, poly) in polys.iter().enumerate() {
        for k in 0..poly.len() {
            let va = poly[k];
            let vb = poly[(k + 1) % poly.len()];
            edges.insert((va, vb), (p, k));
        }
    }
    for (p, poly) in polys.iter().enumerate() {
        for k in 0..poly.len() {
            let va = poly[k];
            let vb = poly[(k + 1) % poly.len()];
            if let Some(&(q, slot)) = edges.get(&(vb, va)) {
                packed[p * nvp * 2 + nvp + k] = q as u16;
                packed[q * nvp * 2 + nvp + slot] = p as u16;
            }
        }
    }
    Ok(packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build_contours, build_regions, LayerGrid, NavMeshConfig, Partitioning, AREA_WALKABLE,
        EMPTY_CELL,
    };

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
            max_edge_len: 0,
            ..NavMeshConfig::default()
        }
    }

    fn mesh_for(g: &LayerGrid, cfg: &NavMeshConfig) -> PolyMesh {
        let rs = build_regions(g, cfg, 0).unwrap();
        let cs = build_contours(g, &rs, cfg, 0).unwrap();
        build_poly_mesh(&cs, g, cfg).unwrap()
    }

    #[test]
    fn test_triangulate_square() {
        let pts = [[0, 0], [4, 0], [4, 4], [0, 4]];
        let tris = triangulate(&pts);
        assert_eq!(tris.len(), 2);
        let area: i64 = tris
            .iter()
            .map(|t| area2(pts[t[0]], pts[t[1]], pts[t[2]]))
            .sum();
        assert_eq!(area, 32); // twice the square's area
    }

    #[test]
    fn test_triangulate_concave() {
        // L shape.
        let pts = [[0, 0], [4, 0], [4, 2], [2, 2], [2, 4], [0, 4]];
        let tris = triangulate(&pts);
        assert_eq!(tris.len(), 4);
        let area: i64 = tris
            .iter()
            .map(|t| area2(pts[t[0]], pts[t[1]], pts[t[2]]))
            .sum();
        assert_eq!(area, 24);
    }

    #[test]
    fn test_square_plate_merges_to_one_poly() {
        let mut g = grid(10, 10);
        fill(&mut g, 1, 1, 9, 9, 5);
        let mesh = mesh_for(&g, &config());
        assert_eq!(mesh.poly_count(), 1);
        assert_eq!(mesh.poly_verts(0).len(), 4);
        assert_eq!(mesh.areas[0], AREA_WALKABLE);
        // All edges of the lone polygon are boundary edges.
        assert!(mesh.poly_neighbors(0).iter().all(|&n| n == MESH_NULL_IDX));
    }

    #[test]
    fn test_l_plate_respects_nvp() {
        let mut g = grid(12, 12);
        fill(&mut g, 1, 1, 11, 5, 5);
        fill(&mut g, 1, 1, 5, 11, 5);
        let mut cfg = config();
        cfg.max_verts_per_poly = 4;
        let mesh = mesh_for(&g, &cfg);
        assert!(mesh.poly_count() >= 2);
        for p in 0..mesh.poly_count() {
            assert!(mesh.poly_verts(p).len() <= 4);
        }
    }

    #[test]
    fn test_neighbor_links_are_symmetric() {
        let mut g = grid(12, 12);
        fill(&mut g, 1, 1, 11, 5, 5);
        fill(&mut g, 1, 1, 5, 11, 5);
        let mut cfg = config();
        cfg.max_verts_per_poly = 4;
        let mesh = mesh_for(&g, &cfg);
        for p in 0..mesh.poly_count() {
            for &n in mesh.poly_neighbors(p) {
                if n == MESH_NULL_IDX {
                    continue;
                }
                assert!(mesh
                    .poly_neighbors(n as usize)
                    .iter()
                    .any(|&back| back == p as u16));
            }
        }
    }

    #[test]
    fn test_vertices_deduplicated_across_contours() {
        // Two regions sharing a border reuse the border vertices.
        let mut g = grid(8, 8);
        fill(&mut g, 0, 0, 3, 6, 5);
        fill(&mut g, 5, 0, 8, 6, 5);
        fill(&mut g, 0, 6, 8, 8, 5);
        let mesh = mesh_for(&g, &config());
        let mut seen = std::collections::HashSet::new();
        for v in &mesh.verts {
            assert!(seen.insert((v[0], v[1])), "duplicate vertex {v:?}");
        }
    }
}
