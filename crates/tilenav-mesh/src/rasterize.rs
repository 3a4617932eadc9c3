//! Triangle rasterization into the voxel heightfield.
//!
//! Each triangle is clipped against grid rows and then against grid cells;
//! the clipped polygon's vertical extent becomes a solid span. Walkability
//! is decided per triangle by slope before rasterization.

use glam::Vec3;
use tilenav_common::{is_walkable_slope, overlap_bounds_xy, Result};

use crate::{GeometryBatch, Heightfield, NavMeshConfig, AREA_NULL, AREA_WALKABLE};

/// Rasterizes a whole geometry batch into `hf`.
///
/// Triangles steeper than the walkable slope (per-chunk override respected)
/// are rasterized as non-walkable solid geometry so they still occlude and
/// produce ledges. Returns the number of triangles rasterized.
pub fn rasterize_batch(
    hf: &mut Heightfield,
    batch: &GeometryBatch,
    config: &NavMeshConfig,
) -> Result<usize> {
    let mut count = 0;
    for chunk in &batch.chunks {
        let slope_cos = chunk
            .slope_override_deg
            .map(|deg| deg.to_radians().cos())
            .unwrap_or_else(|| config.walkable_slope_cos());

        for tri in chunk.indices.chunks_exact(3) {
            let get = |i: u32| chunk.vertices.get(i as usize).copied();
            let (Some(v0), Some(v1), Some(v2)) = (get(tri[0]), get(tri[1]), get(tri[2])) else {
                return Err(tilenav_common::Error::InvalidGeometry(format!(
                    "triangle index out of bounds: {:?} (verts: {})",
                    tri,
                    chunk.vertices.len()
                )));
            };
            let area = if is_walkable_slope(v0, v1, v2, slope_cos) {
                AREA_WALKABLE
            } else {
                AREA_NULL
            };
            rasterize_triangle(hf, v0, v1, v2, area, config.walkable_climb)?;
            count += 1;
        }
    }
    Ok(count)
}

/// Rasterizes one triangle into the heightfield.
pub fn rasterize_triangle(
    hf: &mut Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    merge_thr: i32,
) -> Result<()> {
    let tmin = v0.min(v1).min(v2);
    let tmax = v0.max(v1).max(v2);
    if !overlap_bounds_xy(tmin, tmax, hf.bmin, hf.bmax) {
        return Ok(());
    }

    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;

    // Clip row by row along y, then cell by cell along x.
    let y0 = (((tmin.y - hf.bmin.y) * ics) as i32).clamp(0, hf.height - 1);
    let y1 = (((tmax.y - hf.bmin.y) * ics) as i32).clamp(0, hf.height - 1);

    let mut input: Vec<Vec3> = vec![v0, v1, v2];
    let mut row: Vec<Vec3> = Vec::with_capacity(7);
    let mut rest: Vec<Vec3> = Vec::with_capacity(7);

    for y in y0..=y1 {
        if input.is_empty() {
            break;
        }
        let cy = hf.bmin.y + (y + 1) as f32 * hf.cs;
        divide_poly(&input, &mut row, &mut rest, cy, Axis::Y);
        std::mem::swap(&mut input, &mut rest);
        if row.len() < 3 {
            continue;
        }

        let (rmin_x, rmax_x) = row.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| {
            (lo.min(v.x), hi.max(v.x))
        });
        let x0 = (((rmin_x - hf.bmin.x) * ics) as i32).clamp(0, hf.width - 1);
        let x1 = (((rmax_x - hf.bmin.x) * ics) as i32).clamp(0, hf.width - 1);

        let mut row_in: Vec<Vec3> = row.clone();
        let mut cell: Vec<Vec3> = Vec::with_capacity(7);
        let mut row_rest: Vec<Vec3> = Vec::with_capacity(7);
        for x in x0..=x1 {
            if row_in.is_empty() {
                break;
            }
            let cx = hf.bmin.x + (x + 1) as f32 * hf.cs;
            divide_poly(&row_in, &mut cell, &mut row_rest, cx, Axis::X);
            std::mem::swap(&mut row_in, &mut row_rest);
            if cell.len() < 3 {
                continue;
            }

            let (zmin, zmax) = cell.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| {
                (lo.min(v.z), hi.max(v.z))
            });
            let mut smin = ((zmin - hf.bmin.z) * ich).floor() as i32;
            let mut smax = ((zmax - hf.bmin.z) * ich).ceil() as i32;
            if smax < 0 {
                continue;
            }
            smin = smin.clamp(0, 0xffff);
            smax = smax.clamp(smin, 0xffff);
            hf.add_span(x, y, smin as u16, smax as u16, area, merge_thr)?;
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Y,
}

/// Splits a convex polygon by the plane `axis = offset` into the part below
/// (`out_lo`) and the part above (`out_hi`).
fn divide_poly(input: &[Vec3], out_lo: &mut Vec<Vec3>, out_hi: &mut Vec<Vec3>, offset: f32, axis: Axis) {
    out_lo.clear();
    out_hi.clear();
    let coord = |v: &Vec3| match axis {
        Axis::X => v.x,
        Axis::Y => v.y,
    };

    let n = input.len();
    for i in 0..n {
        let a = input[i];
        let b = input[(i + 1) % n];
        let da = offset - coord(&a);
        let db = offset - coord(&b);
        if da >= 0.0 {
            out_lo.push(a);
        }
        if da <= 0.0 {
            out_hi.push(a);
        }
        // Edge crosses the plane: emit the intersection on both sides.
        if (da > 0.0 && db < 0.0) || (da < 0.0 && db > 0.0) {
            let t = da / (da - db);
            let p = a + (b - a) * t;
            out_lo.push(p);
            out_hi.push(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GeometryChunk;

    fn field(w: i32, h: i32) -> Heightfield {
        Heightfield::new(
            w,
            h,
            Vec3::ZERO,
            Vec3::new(w as f32, h as f32, 20.0),
            1.0,
            0.5,
        )
    }

    #[test]
    fn test_flat_triangle_covers_cells() {
        let mut hf = field(10, 10);
        rasterize_triangle(
            &mut hf,
            Vec3::new(1.0, 1.0, 2.0),
            Vec3::new(9.0, 1.0, 2.0),
            Vec3::new(1.0, 9.0, 2.0),
            AREA_WALKABLE,
            1,
        )
        .unwrap();
        assert!(!hf.column(2, 2).is_empty());
        assert!(!hf.column(1, 7).is_empty());
        assert!(hf.column(9, 9).is_empty());
        // Surface sits at z=2.0 with ch=0.5 -> smax = 4.
        assert_eq!(hf.column(2, 2)[0].smax, 4);
    }

    #[test]
    fn test_triangle_outside_bounds_is_skipped() {
        let mut hf = field(4, 4);
        rasterize_triangle(
            &mut hf,
            Vec3::new(100.0, 100.0, 0.0),
            Vec3::new(101.0, 100.0, 0.0),
            Vec3::new(100.0, 101.0, 0.0),
            AREA_WALKABLE,
            1,
        )
        .unwrap();
        assert_eq!(hf.walkable_span_count(), 0);
    }

    #[test]
    fn test_steep_triangle_rasterized_unwalkable() {
        let mut hf = field(8, 8);
        let batch = GeometryBatch {
            chunks: vec![GeometryChunk {
                // Vertical wall along x.
                vertices: vec![
                    Vec3::new(1.0, 4.0, 0.0),
                    Vec3::new(7.0, 4.0, 0.0),
                    Vec3::new(7.0, 4.0, 5.0),
                ],
                indices: vec![0, 1, 2],
                slope_override_deg: None,
            }],
            ..Default::default()
        };
        let n = rasterize_batch(&mut hf, &batch, &NavMeshConfig::default()).unwrap();
        assert_eq!(n, 1);
        assert_eq!(hf.walkable_span_count(), 0);
        assert!(!hf.column(4, 4).is_empty());
    }

    #[test]
    fn test_bad_index_rejected() {
        let mut hf = field(4, 4);
        let batch = GeometryBatch {
            chunks: vec![GeometryChunk {
                vertices: vec![Vec3::ZERO, Vec3::X],
                indices: vec![0, 1, 9],
                slope_override_deg: None,
            }],
            ..Default::default()
        };
        assert!(rasterize_batch(&mut hf, &batch, &NavMeshConfig::default()).is_err());
    }

    #[test]
    fn test_divide_poly_splits() {
        let tri = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(0.0, 4.0, 0.0),
        ];
        let mut lo = Vec::new();
        let mut hi = Vec::new();
        divide_poly(&tri, &mut lo, &mut hi, 2.0, Axis::X);
        assert!(lo.len() >= 3);
        assert!(hi.len() >= 3);
        assert!(lo.iter().all(|v| v.x <= 2.0 + 1e-5));
        assert!(hi.iter().all(|v| v.x >= 2.0 - 1e-5));
    }
}
