//! Geometry predicates shared by the rasterizer and the polygonizer.

use glam::Vec3;

/// Returns the unnormalized normal of a triangle. Zero-length for degenerate
/// input; callers decide how to treat those.
#[inline]
pub fn triangle_normal(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    (b - a).cross(c - a)
}

/// Classifies a triangle as walkable by the angle between its normal and the
/// up axis (Z). `slope_cos` is `cos(max_slope)`.
#[inline]
pub fn is_walkable_slope(a: Vec3, b: Vec3, c: Vec3, slope_cos: f32) -> bool {
    let n = triangle_normal(a, b, c);
    let len = n.length();
    if len <= f32::EPSILON {
        return false;
    }
    n.z / len > slope_cos
}

/// Tests whether the XY projection of `p` falls inside a convex polygon given
/// as XY pairs. Points on the boundary count as inside.
pub fn point_in_convex_poly_xy(px: f32, py: f32, verts: &[[f32; 2]]) -> bool {
    if verts.len() < 3 {
        return false;
    }
    let mut sign = 0i32;
    for i in 0..verts.len() {
        let j = (i + 1) % verts.len();
        let ex = verts[j][0] - verts[i][0];
        let ey = verts[j][1] - verts[i][1];
        let cross = ex * (py - verts[i][1]) - ey * (px - verts[i][0]);
        let s = if cross >= 0.0 { 1 } else { -1 };
        if sign == 0 {
            sign = s;
        } else if s != sign {
            return false;
        }
    }
    true
}

/// Overlap test for two AABBs projected onto XY.
#[inline]
pub fn overlap_bounds_xy(amin: Vec3, amax: Vec3, bmin: Vec3, bmax: Vec3) -> bool {
    amin.x <= bmax.x && amax.x >= bmin.x && amin.y <= bmax.y && amax.y >= bmin.y
}

/// Signed doubled area of a 2D triangle given as integer coordinates.
/// Positive when `c` lies to the left of the directed edge `a -> b`.
#[inline]
pub fn area2(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> i64 {
    (b[0] - a[0]) as i64 * (c[1] - a[1]) as i64 - (c[0] - a[0]) as i64 * (b[1] - a[1]) as i64
}

#[inline]
pub fn left(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) > 0
}

#[inline]
pub fn left_on(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) >= 0
}

#[inline]
pub fn collinear(a: [i32; 2], b: [i32; 2], c: [i32; 2]) -> bool {
    area2(a, b, c) == 0
}

/// Distance from point `p` to segment `a-b`, squared, in the XY plane.
pub fn dist_pt_seg_sq_2d(px: f32, py: f32, ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    let mut t = 0.0;
    let d = dx * dx + dy * dy;
    if d > 0.0 {
        t = ((px - ax) * dx + (py - ay) * dy) / d;
        t = t.clamp(0.0, 1.0);
    }
    let cx = ax + t * dx - px;
    let cy = ay + t * dy - py;
    cx * cx + cy * cy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walkable_slope_flat_and_wall() {
        let cos45 = 45f32.to_radians().cos();
        // Flat triangle in the XY plane, normal along +Z.
        assert!(is_walkable_slope(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            cos45
        ));
        // Vertical wall.
        assert!(!is_walkable_slope(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            cos45
        ));
    }

    #[test]
    fn test_point_in_convex_poly() {
        let square = [[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]];
        assert!(point_in_convex_poly_xy(2.0, 2.0, &square));
        assert!(!point_in_convex_poly_xy(5.0, 2.0, &square));
    }

    #[test]
    fn test_orientation_predicates() {
        let a = [0, 0];
        let b = [4, 0];
        assert!(left(a, b, [2, 1]));
        assert!(!left(a, b, [2, -1]));
        assert!(collinear(a, b, [2, 0]));
        assert!(left_on(a, b, [2, 0]));
        assert!(!collinear(a, b, [2, 1]));
    }

    #[test]
    fn test_dist_pt_seg() {
        let d = dist_pt_seg_sq_2d(0.0, 1.0, -1.0, 0.0, 1.0, 0.0);
        assert!((d - 1.0).abs() < 1e-6);
    }
}
