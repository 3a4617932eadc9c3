//! Voxel heightfield intermediate.
//!
//! A 2D grid of columns over the tile's XY footprint; each column holds the
//! solid spans produced by rasterization, sorted by height. Mutable during
//! rasterization, filtering and erosion, then discarded once layers are
//! extracted.

use glam::Vec3;
use tilenav_common::{dir_offset_x, dir_offset_y, Error, Result};

use crate::{AREA_LOW, AREA_NULL};

const MAX_HEIGHT: i32 = 0xffff;

/// A solid vertical segment of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Lower span limit, in cells above the heightfield minimum.
    pub smin: u16,
    /// Upper span limit (the floor surface the agent stands on).
    pub smax: u16,
    /// Area id of the floor surface (0 = not walkable).
    pub area: u8,
}

/// Heightfield grid of span columns.
#[derive(Debug, Clone)]
pub struct Heightfield {
    /// Width along the x-axis, in cells.
    pub width: i32,
    /// Height along the y-axis, in cells.
    pub height: i32,
    /// Minimum bounds of the covered AABB.
    pub bmin: Vec3,
    /// Maximum bounds of the covered AABB.
    pub bmax: Vec3,
    /// Horizontal cell size.
    pub cs: f32,
    /// Vertical cell size.
    pub ch: f32,
    /// Span columns, indexed `x + y * width`, each sorted ascending by smin.
    pub columns: Vec<Vec<Span>>,
}

impl Heightfield {
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Self {
        Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); (width * height) as usize],
        }
    }

    #[inline]
    pub fn column(&self, x: i32, y: i32) -> &[Span] {
        &self.columns[(x + y * self.width) as usize]
    }

    #[inline]
    pub fn column_mut(&mut self, x: i32, y: i32) -> &mut Vec<Span> {
        &mut self.columns[(x + y * self.width) as usize]
    }

    /// Adds a span to a column, merging with overlapping spans.
    ///
    /// When two spans merge and their tops lie within `merge_thr` cells of
    /// each other, the larger area id wins; otherwise the higher surface
    /// keeps its own area.
    pub fn add_span(
        &mut self,
        x: i32,
        y: i32,
        smin: u16,
        smax: u16,
        area: u8,
        merge_thr: i32,
    ) -> Result<()> {
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return Err(Error::InvalidGeometry(format!(
                "span position out of bounds: ({x}, {y})"
            )));
        }
        if smin > smax {
            return Err(Error::InvalidGeometry(format!(
                "inverted span: {smin} > {smax}"
            )));
        }

        let mut new = Span { smin, smax, area };
        let col = self.column_mut(x, y);

        // Merge every span that overlaps or touches the new one.
        let mut i = 0;
        while i < col.len() {
            let s = col[i];
            if s.smin > new.smax {
                break;
            }
            if s.smax < new.smin {
                i += 1;
                continue;
            }
            if (s.smax as i32 - new.smax as i32).abs() <= merge_thr {
                new.area = new.area.max(s.area);
            } else if s.smax > new.smax {
                new.area = s.area;
            }
            new.smin = new.smin.min(s.smin);
            new.smax = new.smax.max(s.smax);
            col.remove(i);
        }
        // `i` stayed at the first span above the merged range, so the column
        // remains sorted.
        col.insert(i.min(col.len()), new);
        Ok(())
    }

    /// Total number of walkable spans.
    pub fn walkable_span_count(&self) -> usize {
        self.columns
            .iter()
            .flat_map(|c| c.iter())
            .filter(|s| s.area != AREA_NULL)
            .count()
    }

    /// Marks low obstacles walkable when the agent can step over them.
    ///
    /// A non-walkable span directly above a walkable one inherits the lower
    /// area when the surface difference is at most `walkable_climb`.
    pub fn filter_low_hanging_obstacles(&mut self, walkable_climb: i32) {
        for col in &mut self.columns {
            let mut prev_walkable = false;
            let mut prev_area = AREA_NULL;
            let mut prev_smax = 0i32;
            for s in col.iter_mut() {
                let walkable = s.area != AREA_NULL;
                if !walkable && prev_walkable && (s.smax as i32 - prev_smax) <= walkable_climb {
                    s.area = prev_area;
                }
                // Evaluate the original walkability so runs of obstacles do
                // not cascade.
                prev_walkable = walkable;
                prev_area = s.area;
                prev_smax = s.smax as i32;
            }
        }
    }

    /// Marks spans adjacent to ledges as unwalkable.
    ///
    /// A span is a ledge when stepping to some neighbor would drop further
    /// than `walkable_climb`, or when the traversable neighbor floors spread
    /// more than the climb allowance (steep slope).
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        let w = self.width;
        let h = self.height;
        let mut demote: Vec<(usize, usize)> = Vec::new();

        for y in 0..h {
            for x in 0..w {
                let col = self.column(x, y);
                for (si, s) in col.iter().enumerate() {
                    if s.area == AREA_NULL {
                        continue;
                    }
                    let floor = s.smax as i32;
                    let ceiling = col
                        .get(si + 1)
                        .map(|n| n.smin as i32)
                        .unwrap_or(MAX_HEIGHT);

                    let mut lowest_diff = MAX_HEIGHT;
                    let mut lo_floor = floor;
                    let mut hi_floor = floor;

                    for dir in 0..4 {
                        let nx = x + dir_offset_x(dir);
                        let ny = y + dir_offset_y(dir);
                        if nx < 0 || ny < 0 || nx >= w || ny >= h {
                            lowest_diff = -walkable_climb - 1;
                            break;
                        }

                        let ncol = self.column(nx, ny);
                        // Gap below the neighbor column's first span counts
                        // as a potential drop too.
                        let mut nceiling = ncol.first().map(|n| n.smin as i32).unwrap_or(MAX_HEIGHT);
                        if ceiling.min(nceiling) - floor >= walkable_height {
                            lowest_diff = -walkable_climb - 1;
                            break;
                        }

                        for (ni, n) in ncol.iter().enumerate() {
                            let nfloor = n.smax as i32;
                            nceiling = ncol
                                .get(ni + 1)
                                .map(|nn| nn.smin as i32)
                                .unwrap_or(MAX_HEIGHT);
                            if ceiling.min(nceiling) - floor.max(nfloor) < walkable_height {
                                continue;
                            }
                            let diff = nfloor - floor;
                            lowest_diff = lowest_diff.min(diff);
                            if diff.abs() <= walkable_climb {
                                lo_floor = lo_floor.min(nfloor);
                                hi_floor = hi_floor.max(nfloor);
                            } else if diff < -walkable_climb {
                                break;
                            }
                        }
                        if lowest_diff < -walkable_climb {
                            break;
                        }
                    }

                    if lowest_diff < -walkable_climb || (hi_floor - lo_floor) > walkable_climb {
                        demote.push(((x + y * w) as usize, si));
                    }
                }
            }
        }

        for (ci, si) in demote {
            self.columns[ci][si].area = AREA_NULL;
        }
    }

    /// Removes (or marks) walkable spans without standing room above them.
    ///
    /// When `mark_low_areas` is enabled the spans are kept and tagged with
    /// the reserved low area id so the query layer can special-case them.
    pub fn filter_low_height_spans(&mut self, walkable_height: i32, mark_low_areas: bool) {
        for col in &mut self.columns {
            for si in 0..col.len() {
                if col[si].area == AREA_NULL {
                    continue;
                }
                let floor = col[si].smax as i32;
                let ceiling = col
                    .get(si + 1)
                    .map(|n| n.smin as i32)
                    .unwrap_or(MAX_HEIGHT);
                if ceiling - floor < walkable_height {
                    col[si].area = if mark_low_areas { AREA_LOW } else { AREA_NULL };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AREA_WALKABLE;

    fn field(w: i32, h: i32) -> Heightfield {
        Heightfield::new(
            w,
            h,
            Vec3::ZERO,
            Vec3::new(w as f32, h as f32, 20.0),
            1.0,
            1.0,
        )
    }

    #[test]
    fn test_add_span_sorted_insert() {
        let mut hf = field(4, 4);
        hf.add_span(1, 1, 10, 12, AREA_WALKABLE, 1).unwrap();
        hf.add_span(1, 1, 0, 2, AREA_WALKABLE, 1).unwrap();
        let col = hf.column(1, 1);
        assert_eq!(col.len(), 2);
        assert_eq!(col[0].smin, 0);
        assert_eq!(col[1].smin, 10);
    }

    #[test]
    fn test_add_span_merges_overlap() {
        let mut hf = field(4, 4);
        hf.add_span(0, 0, 0, 5, AREA_WALKABLE, 1).unwrap();
        hf.add_span(0, 0, 4, 8, AREA_NULL, 1).unwrap();
        let col = hf.column(0, 0);
        assert_eq!(col.len(), 1);
        assert_eq!(col[0].smin, 0);
        assert_eq!(col[0].smax, 8);
        // Tops differ by more than the merge threshold, so the higher
        // surface keeps its own (null) area.
        assert_eq!(col[0].area, AREA_NULL);
    }

    #[test]
    fn test_add_span_merge_threshold_keeps_walkable() {
        let mut hf = field(4, 4);
        hf.add_span(0, 0, 0, 5, AREA_WALKABLE, 1).unwrap();
        hf.add_span(0, 0, 2, 6, AREA_NULL, 1).unwrap();
        let col = hf.column(0, 0);
        assert_eq!(col.len(), 1);
        assert_eq!(col[0].area, AREA_WALKABLE);
    }

    #[test]
    fn test_add_span_out_of_bounds() {
        let mut hf = field(2, 2);
        assert!(hf.add_span(5, 0, 0, 1, AREA_WALKABLE, 1).is_err());
    }

    #[test]
    fn test_filter_low_hanging() {
        let mut hf = field(3, 3);
        hf.add_span(1, 1, 0, 5, AREA_WALKABLE, 1).unwrap();
        hf.add_span(1, 1, 6, 7, AREA_NULL, 1).unwrap();
        hf.filter_low_hanging_obstacles(3);
        assert_eq!(hf.column(1, 1)[1].area, AREA_WALKABLE);
    }

    #[test]
    fn test_filter_low_hanging_respects_climb() {
        let mut hf = field(3, 3);
        hf.add_span(1, 1, 0, 5, AREA_WALKABLE, 1).unwrap();
        hf.add_span(1, 1, 6, 12, AREA_NULL, 1).unwrap();
        hf.filter_low_hanging_obstacles(3);
        assert_eq!(hf.column(1, 1)[1].area, AREA_NULL);
    }

    #[test]
    fn test_filter_ledge_spans_marks_cliff_edge() {
        let mut hf = field(5, 5);
        // High plateau in the center column, low floor everywhere else.
        for y in 0..5 {
            for x in 0..5 {
                let (smin, smax) = if x == 2 { (0, 10) } else { (0, 1) };
                hf.add_span(x, y, smin, smax, AREA_WALKABLE, 1).unwrap();
            }
        }
        hf.filter_ledge_spans(3, 2);
        // The plateau drops 9 cells to its neighbors: a ledge.
        assert_eq!(hf.column(2, 2)[0].area, AREA_NULL);
        // Low ground next to the plateau only steps up, which is blocked
        // but not a ledge; the span stays walkable.
        assert_eq!(hf.column(1, 2)[0].area, AREA_WALKABLE);
    }

    #[test]
    fn test_filter_low_height_spans() {
        let mut hf = field(3, 3);
        hf.add_span(0, 0, 0, 2, AREA_WALKABLE, 1).unwrap();
        hf.add_span(0, 0, 4, 10, AREA_WALKABLE, 1).unwrap();
        hf.filter_low_height_spans(5, false);
        assert_eq!(hf.column(0, 0)[0].area, AREA_NULL);
        assert_eq!(hf.column(0, 0)[1].area, AREA_WALKABLE);
    }

    #[test]
    fn test_filter_low_height_spans_mark_mode() {
        let mut hf = field(3, 3);
        hf.add_span(0, 0, 0, 2, AREA_WALKABLE, 1).unwrap();
        hf.add_span(0, 0, 4, 10, AREA_WALKABLE, 1).unwrap();
        hf.filter_low_height_spans(5, true);
        assert_eq!(hf.column(0, 0)[0].area, AREA_LOW);
    }
}
