//! Input data supplied by the geometry exporter for one tile.

use glam::Vec3;

/// A batch of geometry for one tile bake.
///
/// Moved into the tile task that consumes it and discarded once the layers
/// and blobs are produced.
#[derive(Debug, Clone, Default)]
pub struct GeometryBatch {
    /// Triangle geometry, grouped per source so each source can carry its
    /// own walkable-slope override.
    pub chunks: Vec<GeometryChunk>,
    /// Area modifiers, applied in ascending `priority` order.
    pub modifiers: Vec<AreaModifier>,
    /// Off-mesh link descriptors whose start point falls in this tile.
    pub links: Vec<OffMeshLink>,
}

impl GeometryBatch {
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.indices.is_empty())
    }

    pub fn triangle_count(&self) -> usize {
        self.chunks.iter().map(|c| c.indices.len() / 3).sum()
    }
}

/// Vertex/index arrays from one source object.
#[derive(Debug, Clone, Default)]
pub struct GeometryChunk {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    /// Per-source walkable slope override, degrees.
    pub slope_override_deg: Option<f32>,
}

/// Shape of an area modifier volume.
#[derive(Debug, Clone)]
pub enum ModifierShape {
    Box { min: Vec3, max: Vec3 },
    Cylinder { center: Vec3, radius: f32, height: f32 },
    /// Convex polygon in the XY plane extruded over [z_min, z_max].
    Convex { verts: Vec<[f32; 2]>, z_min: f32, z_max: f32 },
}

impl ModifierShape {
    /// Conservative world-space bounds of the volume.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        match self {
            ModifierShape::Box { min, max } => (*min, *max),
            ModifierShape::Cylinder { center, radius, height } => (
                Vec3::new(center.x - radius, center.y - radius, center.z),
                Vec3::new(center.x + radius, center.y + radius, center.z + height),
            ),
            ModifierShape::Convex { verts, z_min, z_max } => {
                let mut min = Vec3::new(f32::MAX, f32::MAX, *z_min);
                let mut max = Vec3::new(f32::MIN, f32::MIN, *z_max);
                for v in verts {
                    min.x = min.x.min(v[0]);
                    min.y = min.y.min(v[1]);
                    max.x = max.x.max(v[0]);
                    max.y = max.y.max(v[1]);
                }
                (min, max)
            }
        }
    }
}

/// Overrides area ids within its footprint on already-built layers.
#[derive(Debug, Clone)]
pub struct AreaModifier {
    pub shape: ModifierShape,
    /// Area id written into covered cells.
    pub area: u8,
    /// When set, only cells currently holding this area id are overwritten.
    /// Enables ordered area-priority semantics.
    pub replace_area: Option<u8>,
    /// Application order; lower priorities are applied first so higher ones
    /// win.
    pub priority: i32,
    /// Extend the vertical range downward by the agent height, so floors
    /// whose standing room reaches into the volume are covered too.
    pub expand_height: bool,
}

/// Kind of explicit connection between two not-directly-adjacent polygons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OffMeshLinkKind {
    /// Point-to-point connector, e.g. a jump link.
    Point { start: Vec3, end: Vec3 },
    /// Segment-to-segment connector, e.g. a climbable ledge.
    Segment { start: (Vec3, Vec3), end: (Vec3, Vec3) },
}

/// Off-mesh link descriptor. Snap radius and height are consumed by the
/// query layer, not at bake time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffMeshLink {
    pub kind: OffMeshLinkKind,
    pub bidirectional: bool,
    pub snap_radius: f32,
    pub snap_height: f32,
    pub area: u8,
    pub flags: u16,
    /// Stable id assigned by the exporter.
    pub user_id: u32,
}
