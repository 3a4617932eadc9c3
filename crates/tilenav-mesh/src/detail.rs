//! Detail mesh: per-polygon height refinement.
//!
//! The polygon mesh keeps one height per vertex, which flattens ramps and
//! uneven ground inside large polygons. The detail mesh re-samples polygon
//! edges against the voxel heights and emits a small triangle set per
//! polygon for accurate ground-height queries.

use glam::Vec3;
use tilenav_common::Result;

use crate::{LayerGrid, NavMeshConfig, PolyMesh, EMPTY_CELL};

/// Per-polygon vertex lookups stay in a byte, so refinement stops early
/// rather than overflow.
const MAX_DETAIL_VERTS: usize = 127;

/// Refined height triangulation, one sub-mesh per polygon.
#[derive(Debug, Clone, Default)]
pub struct DetailMesh {
    /// `[first_vert, vert_count, first_tri, tri_count]` per polygon.
    pub meshes: Vec<[u32; 4]>,
    /// World-space vertices.
    pub verts: Vec<Vec3>,
    /// Triangles as indices local to the owning polygon's vertex range.
    pub tris: Vec<[u8; 3]>,
}

impl DetailMesh {
    pub fn triangle_count(&self) -> usize {
        self.tris.len()
    }
}

/// Voxel floor height near a world position, if any cell within a small
/// search radius is occupied.
fn sample_height(grid: &LayerGrid, wx: f32, wy: f32) -> Option<f32> {
    let cx = ((wx - grid.bmin.x) / grid.cs).floor() as i32;
    let cy = ((wy - grid.bmin.y) / grid.cs).floor() as i32;
    for radius in 0i32..3 {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx.abs() != radius && dy.abs() != radius {
                    continue;
                }
                let x = cx + dx;
                let y = cy + dy;
                if !grid.in_bounds(x, y) {
                    continue;
                }
                let h = grid.heights[grid.idx(x, y)];
                if h != EMPTY_CELL {
                    return Some(grid.bmin.z + h as f32 * grid.ch);
                }
            }
        }
    }
    None
}

/// Builds the detail mesh for every polygon of `mesh`.
///
/// With `detail_sample_dist` zero each polygon becomes a plain fan over
/// its corners; otherwise edges gain vertices wherever the voxel height
/// deviates from the interpolated edge by more than
/// `detail_sample_max_error`.
pub fn build_detail_mesh(
    mesh: &PolyMesh,
    grid: &LayerGrid,
    config: &NavMeshConfig,
) -> Result<DetailMesh> {
    let mut out = DetailMesh::default();
    let sample_dist = config.detail_sample_dist;
    let max_error = config.detail_sample_max_error;

    for p in 0..mesh.poly_count() {
        let corner_idx = mesh.poly_verts(p);
        let first_vert = out.verts.len() as u32;
        let first_tri = out.tris.len() as u32;

        // Boundary loop: polygon corners plus refined edge samples.
        let mut boundary: Vec<Vec3> = Vec::with_capacity(corner_idx.len());
        for (k, &vi) in corner_idx.iter().enumerate() {
            let a = mesh.vertex_pos(vi as usize);
            let b = mesh.vertex_pos(corner_idx[(k + 1) % corner_idx.len()] as usize);
            boundary.push(a);
            if sample_dist > 0.0 {
                refine_edge(grid, a, b, sample_dist, max_error, &mut boundary);
            }
            if boundary.len() >= MAX_DETAIL_VERTS {
                boundary.truncate(MAX_DETAIL_VERTS);
                break;
            }
        }

        // Convex boundary, so a fan triangulation is valid; slivers from
        // collinear edge samples are skipped.
        let n = boundary.len();
        for i in 1..n.saturating_sub(1) {
            let a = boundary[0];
            let b = boundary[i];
            let c = boundary[i + 1];
            let cross = (b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y);
            if cross.abs() < 1e-6 {
                continue;
            }
            out.tris.push([0, i as u8, (i + 1) as u8]);
        }
        out.verts.extend_from_slice(&boundary);
        out.meshes.push([
            first_vert,
            n as u32,
            first_tri,
            out.tris.len() as u32 - first_tri,
        ]);
    }
    Ok(out)
}

/// Inserts samples along edge `a -> b` where the voxel floor deviates
/// from linear interpolation. Endpoint `a` is assumed already pushed.
fn refine_edge(
    grid: &LayerGrid,
    a: Vec3,
    b: Vec3,
    sample_dist: f32,
    max_error: f32,
    boundary: &mut Vec<Vec3>,
) {
    let d = b - a;
    let len = (d.x * d.x + d.y * d.y).sqrt();
    if len <= sample_dist {
        return;
    }
    let steps = (len / sample_dist).ceil() as i32;
    for k in 1..steps {
        if boundary.len() >= MAX_DETAIL_VERTS {
            return;
        }
        let t = k as f32 / steps as f32;
        let p = a.lerp(b, t);
        let Some(h) = sample_height(grid, p.x, p.y) else {
            continue;
        };
        if (h - p.z).abs() > max_error {
            boundary.push(Vec3::new(p.x, p.y, h));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        build_contours, build_poly_mesh, build_regions, LayerGrid, NavMeshConfig, Partitioning,
        AREA_WALKABLE,
    };

    fn ramp_grid(w: i32, h: i32) -> LayerGrid {
        let mut g = LayerGrid {
            tile_x: 0,
            tile_y: 0,
            layer: 0,
            width: w,
            height: h,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(w as f32, h as f32, 40.0),
            cs: 1.0,
            ch: 0.1,
            hmin: 0,
            hmax: 0,
            heights: vec![EMPTY_CELL; (w * h) as usize],
            areas: vec![0; (w * h) as usize],
        };
        // A bump in the middle of an otherwise flat plate.
        for y in 0..h {
            for x in 0..w {
                let idx = g.idx(x, y);
                let mid = w / 2;
                g.heights[idx] = if (x - mid).abs() <= 1 { 40 } else { 10 };
                g.areas[idx] = AREA_WALKABLE;
            }
        }
        g
    }

    fn config() -> NavMeshConfig {
        NavMeshConfig {
            partitioning: Partitioning::Monotone,
            min_region_area: 2,
            merge_region_area: 400,
            walkable_climb: 40,
            max_edge_len: 0,
            detail_sample_dist: 1.0,
            detail_sample_max_error: 0.05,
            ..NavMeshConfig::default()
        }
    }

    fn pipeline(g: &LayerGrid, cfg: &NavMeshConfig) -> (PolyMesh, DetailMesh) {
        let rs = build_regions(g, cfg, 0).unwrap();
        let cs = build_contours(g, &rs, cfg, 0).unwrap();
        let mesh = build_poly_mesh(&cs, g, cfg).unwrap();
        let detail = build_detail_mesh(&mesh, g, cfg).unwrap();
        (mesh, detail)
    }

    #[test]
    fn test_detail_has_submesh_per_poly() {
        let g = ramp_grid(12, 12);
        let (mesh, detail) = pipeline(&g, &config());
        assert_eq!(detail.meshes.len(), mesh.poly_count());
        assert!(detail.triangle_count() > 0);
    }

    #[test]
    fn test_sampling_disabled_gives_plain_fans() {
        let g = ramp_grid(12, 12);
        let mut cfg = config();
        cfg.detail_sample_dist = 0.0;
        let (mesh, detail) = pipeline(&g, &cfg);
        for (p, m) in detail.meshes.iter().enumerate() {
            assert_eq!(m[1] as usize, mesh.poly_verts(p).len());
        }
    }

    #[test]
    fn test_bump_adds_edge_samples() {
        let g = ramp_grid(12, 12);
        let (mesh, detail) = pipeline(&g, &config());
        let plain: usize = (0..mesh.poly_count()).map(|p| mesh.poly_verts(p).len()).sum();
        assert!(
            detail.verts.len() > plain,
            "refinement added no vertices: {} vs {plain}",
            detail.verts.len()
        );
    }

    #[test]
    fn test_tri_indices_stay_local() {
        let g = ramp_grid(12, 12);
        let (_, detail) = pipeline(&g, &config());
        for m in &detail.meshes {
            for t in &detail.tris[m[2] as usize..(m[2] + m[3]) as usize] {
                for &i in t {
                    assert!((i as u32) < m[1]);
                }
            }
        }
    }
}
