//! Small math helpers used across the baking pipeline.

/// Offset in x for each of the four cardinal directions (W, N, E, S).
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
/// Offset in y for each of the four cardinal directions (W, N, E, S).
pub const DIR_OFFSET_Y: [i32; 4] = [0, 1, 0, -1];

/// Returns the x offset for a direction index.
#[inline]
pub fn dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSET_X[dir & 3]
}

/// Returns the y offset for a direction index.
#[inline]
pub fn dir_offset_y(dir: usize) -> i32 {
    DIR_OFFSET_Y[dir & 3]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_offsets_are_cardinal() {
        for d in 0..4 {
            let md = (d + 2) & 3;
            assert_eq!(dir_offset_x(d), -dir_offset_x(md));
            assert_eq!(dir_offset_y(d), -dir_offset_y(md));
        }
    }
}
