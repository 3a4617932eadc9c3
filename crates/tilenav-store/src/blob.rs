//! Serialized tile mesh blobs.
//!
//! A `TileMeshBlob` is the self-contained artifact one layer of one tile
//! bakes down to: quantized vertices, convex polygons with adjacency,
//! detail meshes, a BV-tree, off-mesh connections and cluster ids. The
//! byte format is little-endian throughout and the reader validates
//! magic, version and length before touching any array.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use tilenav_common::{Error, Result, TileBounds};
use tilenav_mesh::{DetailMesh, OffMeshLink, OffMeshLinkKind, PolyMesh};

use crate::bvtree::{build_bv_tree, BvNode};
use crate::poly_ref::POLY_MASK;

pub const BLOB_MAGIC: u32 = u32::from_le_bytes(*b"TNAV");
pub const BLOB_VERSION: u32 = 1;

/// Default polygon flag: traversable.
pub const POLY_FLAG_WALK: u16 = 0x01;
/// Polygon flag marking an off-mesh connection endpoint polygon.
pub const POLY_FLAG_OFFMESH: u16 = 0x02;

/// Point-to-point off-mesh connection (for example a jump link).
#[derive(Debug, Clone, PartialEq)]
pub struct OffMeshPointConn {
    pub start: Vec3,
    pub end: Vec3,
    pub snap_radius: f32,
    pub snap_height: f32,
    pub area: u8,
    pub flags: u16,
    pub bidirectional: bool,
    pub user_id: u32,
}

/// Segment-to-segment off-mesh connection.
#[derive(Debug, Clone, PartialEq)]
pub struct OffMeshSegmentConn {
    pub start: (Vec3, Vec3),
    pub end: (Vec3, Vec3),
    pub snap_radius: f32,
    pub snap_height: f32,
    pub area: u8,
    pub flags: u16,
    pub bidirectional: bool,
    pub user_id: u32,
}

/// Baked mesh data for one layer of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMeshBlob {
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: u16,
    pub nvp: u16,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
    /// Quantized vertices, `(x, y, z)` in cells relative to `bmin`.
    pub verts: Vec<[u16; 3]>,
    /// `2 * nvp` entries per polygon: vertex indices then edge neighbors.
    pub polys: Vec<u16>,
    pub poly_flags: Vec<u16>,
    pub poly_areas: Vec<u8>,
    /// Cluster id per polygon.
    pub poly_clusters: Vec<u16>,
    pub cluster_count: u16,
    pub detail_meshes: Vec<[u32; 4]>,
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 3]>,
    pub bv_nodes: Vec<BvNode>,
    pub offmesh_points: Vec<OffMeshPointConn>,
    pub offmesh_segments: Vec<OffMeshSegmentConn>,
}

/// Inputs for [`build_tile_blob`].
pub struct TileBlobParams<'a> {
    pub mesh: &'a PolyMesh,
    pub detail: Option<&'a DetailMesh>,
    pub links: &'a [OffMeshLink],
    /// Traversable region id pairs, from contour tracing.
    pub region_adjacency: &'a [(u16, u16)],
    pub tile_x: i32,
    pub tile_y: i32,
    pub layer: u16,
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
}

/// Assembles the blob for one baked layer.
///
/// Clusters are the connected components of the region adjacency;
/// polygons inherit the cluster of their source region. Off-mesh links
/// are carried verbatim and resolved against polygons at query time.
pub fn build_tile_blob(params: TileBlobParams<'_>) -> Result<TileMeshBlob> {
    let mesh = params.mesh;
    if mesh.poly_count() as u64 > POLY_MASK {
        return Err(Error::CapacityExceeded(format!(
            "{} polygons do not fit the reference index width",
            mesh.poly_count()
        )));
    }

    let poly_clusters = assign_clusters(&mesh.regions, params.region_adjacency);
    let cluster_count = poly_clusters.iter().copied().max().map_or(0, |m| m + 1);

    let (detail_meshes, detail_verts, detail_tris) = match params.detail {
        Some(d) => (d.meshes.clone(), d.verts.clone(), d.tris.clone()),
        None => (Vec::new(), Vec::new(), Vec::new()),
    };

    let mut offmesh_points = Vec::new();
    let mut offmesh_segments = Vec::new();
    for link in params.links {
        match link.kind {
            OffMeshLinkKind::Point { start, end } => offmesh_points.push(OffMeshPointConn {
                start,
                end,
                snap_radius: link.snap_radius,
                snap_height: link.snap_height,
                area: link.area,
                flags: link.flags | POLY_FLAG_OFFMESH,
                bidirectional: link.bidirectional,
                user_id: link.user_id,
            }),
            OffMeshLinkKind::Segment { start, end } => {
                offmesh_segments.push(OffMeshSegmentConn {
                    start,
                    end,
                    snap_radius: link.snap_radius,
                    snap_height: link.snap_height,
                    area: link.area,
                    flags: link.flags | POLY_FLAG_OFFMESH,
                    bidirectional: link.bidirectional,
                    user_id: link.user_id,
                })
            }
        }
    }

    Ok(TileMeshBlob {
        tile_x: params.tile_x,
        tile_y: params.tile_y,
        layer: params.layer,
        nvp: mesh.nvp as u16,
        bmin: mesh.bmin,
        bmax: mesh.bmax,
        cs: mesh.cs,
        ch: mesh.ch,
        walkable_height: params.walkable_height,
        walkable_radius: params.walkable_radius,
        walkable_climb: params.walkable_climb,
        verts: mesh.verts.clone(),
        polys: mesh.polys.clone(),
        poly_flags: vec![POLY_FLAG_WALK; mesh.poly_count()],
        poly_areas: mesh.areas.clone(),
        poly_clusters,
        cluster_count,
        detail_meshes,
        detail_verts,
        detail_tris,
        bv_nodes: build_bv_tree(mesh),
        offmesh_points,
        offmesh_segments,
    })
}

/// Connected components over region ids; returns the cluster id per
/// polygon, contiguous from zero.
fn assign_clusters(poly_regions: &[u16], adjacency: &[(u16, u16)]) -> Vec<u16> {
    let max_region = poly_regions.iter().copied().max().unwrap_or(0) as usize;
    let mut parent: Vec<u16> = (0..=max_region as u16).collect();

    fn find(parent: &mut [u16], mut r: u16) -> u16 {
        while parent[r as usize] != r {
            parent[r as usize] = parent[parent[r as usize] as usize];
            r = parent[r as usize];
        }
        r
    }
    for &(a, b) in adjacency {
        if (a as usize) > max_region || (b as usize) > max_region {
            continue;
        }
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        if ra != rb {
            parent[ra as usize] = rb;
        }
    }

    let mut cluster_of_root: Vec<Option<u16>> = vec![None; max_region + 1];
    let mut next = 0u16;
    poly_regions
        .iter()
        .map(|&r| {
            let root = find(&mut parent, r) as usize;
            *cluster_of_root[root].get_or_insert_with(|| {
                let c = next;
                next += 1;
                c
            })
        })
        .collect()
}

impl TileMeshBlob {
    pub fn poly_count(&self) -> usize {
        self.poly_flags.len()
    }

    pub fn bounds(&self) -> TileBounds {
        TileBounds {
            min: self.bmin,
            max: self.bmax,
        }
    }

    /// Serializes the blob. Deterministic for identical content.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = Cursor::new(Vec::with_capacity(256 + self.verts.len() * 6));
        w.write_u32::<LittleEndian>(BLOB_MAGIC)?;
        w.write_u32::<LittleEndian>(BLOB_VERSION)?;
        w.write_i32::<LittleEndian>(self.tile_x)?;
        w.write_i32::<LittleEndian>(self.tile_y)?;
        w.write_u16::<LittleEndian>(self.layer)?;
        w.write_u16::<LittleEndian>(self.nvp)?;
        w.write_u32::<LittleEndian>(self.verts.len() as u32)?;
        w.write_u32::<LittleEndian>(self.poly_count() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_meshes.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_verts.len() as u32)?;
        w.write_u32::<LittleEndian>(self.detail_tris.len() as u32)?;
        w.write_u32::<LittleEndian>(self.bv_nodes.len() as u32)?;
        w.write_u32::<LittleEndian>(self.offmesh_points.len() as u32)?;
        w.write_u32::<LittleEndian>(self.offmesh_segments.len() as u32)?;
        w.write_u16::<LittleEndian>(self.cluster_count)?;
        for v in [self.bmin, self.bmax] {
            write_vec3(&mut w, v)?;
        }
        for f in [
            self.cs,
            self.ch,
            self.walkable_height,
            self.walkable_radius,
            self.walkable_climb,
        ] {
            w.write_f32::<LittleEndian>(f)?;
        }

        for v in &self.verts {
            for &c in v {
                w.write_u16::<LittleEndian>(c)?;
            }
        }
        for &p in &self.polys {
            w.write_u16::<LittleEndian>(p)?;
        }
        for &f in &self.poly_flags {
            w.write_u16::<LittleEndian>(f)?;
        }
        w.write_all(&self.poly_areas)?;
        for &c in &self.poly_clusters {
            w.write_u16::<LittleEndian>(c)?;
        }
        for m in &self.detail_meshes {
            for &v in m {
                w.write_u32::<LittleEndian>(v)?;
            }
        }
        for v in &self.detail_verts {
            write_vec3(&mut w, *v)?;
        }
        for t in &self.detail_tris {
            w.write_all(t)?;
        }
        for n in &self.bv_nodes {
            for &c in &n.bmin {
                w.write_u16::<LittleEndian>(c)?;
            }
            for &c in &n.bmax {
                w.write_u16::<LittleEndian>(c)?;
            }
            w.write_i32::<LittleEndian>(n.index)?;
        }
        for c in &self.offmesh_points {
            write_vec3(&mut w, c.start)?;
            write_vec3(&mut w, c.end)?;
            w.write_f32::<LittleEndian>(c.snap_radius)?;
            w.write_f32::<LittleEndian>(c.snap_height)?;
            w.write_u32::<LittleEndian>(c.user_id)?;
            w.write_u16::<LittleEndian>(c.flags)?;
            w.write_u8(c.area)?;
            w.write_u8(c.bidirectional as u8)?;
        }
        for c in &self.offmesh_segments {
            write_vec3(&mut w, c.start.0)?;
            write_vec3(&mut w, c.start.1)?;
            write_vec3(&mut w, c.end.0)?;
            write_vec3(&mut w, c.end.1)?;
            w.write_f32::<LittleEndian>(c.snap_radius)?;
            w.write_f32::<LittleEndian>(c.snap_height)?;
            w.write_u32::<LittleEndian>(c.user_id)?;
            w.write_u16::<LittleEndian>(c.flags)?;
            w.write_u8(c.area)?;
            w.write_u8(c.bidirectional as u8)?;
        }
        Ok(w.into_inner())
    }

    /// Parses a blob, validating magic, version and total length before
    /// any array is allocated.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut r = Cursor::new(data);
        let magic = read_u32(&mut r)?;
        if magic != BLOB_MAGIC {
            return Err(Error::InvalidData(format!(
                "bad tile blob magic: {magic:#010x}"
            )));
        }
        let version = read_u32(&mut r)?;
        if version != BLOB_VERSION {
            return Err(Error::InvalidData(format!(
                "unsupported tile blob version: {version}"
            )));
        }
        let tile_x = read_i32(&mut r)?;
        let tile_y = read_i32(&mut r)?;
        let layer = read_u16(&mut r)?;
        let nvp = read_u16(&mut r)?;
        if !(3..=63).contains(&nvp) {
            return Err(Error::InvalidData(format!("bad nvp: {nvp}")));
        }
        let vert_count = read_u32(&mut r)? as usize;
        let poly_count = read_u32(&mut r)? as usize;
        let dm_count = read_u32(&mut r)? as usize;
        let dv_count = read_u32(&mut r)? as usize;
        let dt_count = read_u32(&mut r)? as usize;
        let bv_count = read_u32(&mut r)? as usize;
        let op_count = read_u32(&mut r)? as usize;
        let os_count = read_u32(&mut r)? as usize;
        let cluster_count = read_u16(&mut r)?;

        // Total size check up front, so corrupt counts cannot drive huge
        // allocations or partial reads.
        let header = r.position() as usize + 2 * 12 + 5 * 4;
        let expected = header
            + vert_count * 6
            + poly_count * (nvp as usize * 4 + 2 + 1 + 2)
            + dm_count * 16
            + dv_count * 12
            + dt_count * 3
            + bv_count * 16
            + op_count * 40
            + os_count * 64;
        if data.len() != expected {
            return Err(Error::InvalidData(format!(
                "tile blob length {} does not match header (expected {expected})",
                data.len()
            )));
        }

        let bmin = read_vec3(&mut r)?;
        let bmax = read_vec3(&mut r)?;
        let cs = read_f32(&mut r)?;
        let ch = read_f32(&mut r)?;
        let walkable_height = read_f32(&mut r)?;
        let walkable_radius = read_f32(&mut r)?;
        let walkable_climb = read_f32(&mut r)?;

        let mut verts = Vec::with_capacity(vert_count);
        for _ in 0..vert_count {
            verts.push([read_u16(&mut r)?, read_u16(&mut r)?, read_u16(&mut r)?]);
        }
        let mut polys = Vec::with_capacity(poly_count * nvp as usize * 2);
        for _ in 0..poly_count * nvp as usize * 2 {
            polys.push(read_u16(&mut r)?);
        }
        let mut poly_flags = Vec::with_capacity(poly_count);
        for _ in 0..poly_count {
            poly_flags.push(read_u16(&mut r)?);
        }
        let mut poly_areas = vec![0u8; poly_count];
        r.read_exact(&mut poly_areas)
            .map_err(|_| truncated())?;
        let mut poly_clusters = Vec::with_capacity(poly_count);
        for _ in 0..poly_count {
            poly_clusters.push(read_u16(&mut r)?);
        }
        let mut detail_meshes = Vec::with_capacity(dm_count);
        for _ in 0..dm_count {
            detail_meshes.push([
                read_u32(&mut r)?,
                read_u32(&mut r)?,
                read_u32(&mut r)?,
                read_u32(&mut r)?,
            ]);
        }
        let mut detail_verts = Vec::with_capacity(dv_count);
        for _ in 0..dv_count {
            detail_verts.push(read_vec3(&mut r)?);
        }
        let mut detail_tris = Vec::with_capacity(dt_count);
        for _ in 0..dt_count {
            let mut t = [0u8; 3];
            r.read_exact(&mut t).map_err(|_| truncated())?;
            detail_tris.push(t);
        }
        let mut bv_nodes = Vec::with_capacity(bv_count);
        for _ in 0..bv_count {
            let bmin = [read_u16(&mut r)?, read_u16(&mut r)?, read_u16(&mut r)?];
            let bmax = [read_u16(&mut r)?, read_u16(&mut r)?, read_u16(&mut r)?];
            let index = read_i32(&mut r)?;
            bv_nodes.push(BvNode { bmin, bmax, index });
        }
        let mut offmesh_points = Vec::with_capacity(op_count);
        for _ in 0..op_count {
            offmesh_points.push(OffMeshPointConn {
                start: read_vec3(&mut r)?,
                end: read_vec3(&mut r)?,
                snap_radius: read_f32(&mut r)?,
                snap_height: read_f32(&mut r)?,
                user_id: read_u32(&mut r)?,
                flags: read_u16(&mut r)?,
                area: read_u8(&mut r)?,
                bidirectional: read_u8(&mut r)? != 0,
            });
        }
        let mut offmesh_segments = Vec::with_capacity(os_count);
        for _ in 0..os_count {
            offmesh_segments.push(OffMeshSegmentConn {
                start: (read_vec3(&mut r)?, read_vec3(&mut r)?),
                end: (read_vec3(&mut r)?, read_vec3(&mut r)?),
                snap_radius: read_f32(&mut r)?,
                snap_height: read_f32(&mut r)?,
                user_id: read_u32(&mut r)?,
                flags: read_u16(&mut r)?,
                area: read_u8(&mut r)?,
                bidirectional: read_u8(&mut r)? != 0,
            });
        }

        // Index sanity: polygon vertex and neighbor entries must stay in
        // range.
        for pi in 0..poly_count {
            let base = pi * nvp as usize * 2;
            for k in 0..nvp as usize {
                let v = polys[base + k];
                if v != tilenav_mesh::MESH_NULL_IDX && v as usize >= vert_count {
                    return Err(Error::InvalidData(format!(
                        "polygon vertex index {v} out of range"
                    )));
                }
                let nb = polys[base + nvp as usize + k];
                if nb != tilenav_mesh::MESH_NULL_IDX && nb as usize >= poly_count {
                    return Err(Error::InvalidData(format!(
                        "polygon neighbor index {nb} out of range"
                    )));
                }
            }
        }

        Ok(Self {
            tile_x,
            tile_y,
            layer,
            nvp,
            bmin,
            bmax,
            cs,
            ch,
            walkable_height,
            walkable_radius,
            walkable_climb,
            verts,
            polys,
            poly_flags,
            poly_areas,
            poly_clusters,
            cluster_count,
            detail_meshes,
            detail_verts,
            detail_tris,
            bv_nodes,
            offmesh_points,
            offmesh_segments,
        })
    }
}

fn truncated() -> Error {
    Error::InvalidData("truncated tile blob".to_string())
}

fn write_vec3(w: &mut Cursor<Vec<u8>>, v: Vec3) -> Result<()> {
    w.write_f32::<LittleEndian>(v.x)?;
    w.write_f32::<LittleEndian>(v.y)?;
    w.write_f32::<LittleEndian>(v.z)?;
    Ok(())
}

fn read_u8(r: &mut Cursor<&[u8]>) -> Result<u8> {
    r.read_u8().map_err(|_| truncated())
}
fn read_u16(r: &mut Cursor<&[u8]>) -> Result<u16> {
    r.read_u16::<LittleEndian>().map_err(|_| truncated())
}
fn read_u32(r: &mut Cursor<&[u8]>) -> Result<u32> {
    r.read_u32::<LittleEndian>().map_err(|_| truncated())
}
fn read_i32(r: &mut Cursor<&[u8]>) -> Result<i32> {
    r.read_i32::<LittleEndian>().map_err(|_| truncated())
}
fn read_f32(r: &mut Cursor<&[u8]>) -> Result<f32> {
    r.read_f32::<LittleEndian>().map_err(|_| truncated())
}
fn read_vec3(r: &mut Cursor<&[u8]>) -> Result<Vec3> {
    Ok(Vec3::new(read_f32(r)?, read_f32(r)?, read_f32(r)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilenav_mesh::MESH_NULL_IDX;

    fn sample_mesh() -> PolyMesh {
        let nvp = 6;
        let mut polys = vec![MESH_NULL_IDX; 2 * nvp * 2];
        // Two triangles sharing edge 1-2.
        polys[0] = 0;
        polys[1] = 1;
        polys[2] = 2;
        polys[nvp + 1] = 1; // neighbor across edge 1->2
        polys[nvp * 2] = 2;
        polys[nvp * 2 + 1] = 1;
        polys[nvp * 2 + 2] = 3;
        polys[nvp * 2 + nvp] = 0;
        PolyMesh {
            verts: vec![[0, 0, 2], [4, 0, 2], [4, 4, 2], [0, 4, 2]],
            polys,
            regions: vec![1, 2],
            areas: vec![63, 63],
            nvp,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(4.0, 4.0, 1.0),
            cs: 1.0,
            ch: 0.5,
        }
    }

    fn sample_blob() -> TileMeshBlob {
        let mesh = sample_mesh();
        let links = [OffMeshLink {
            kind: OffMeshLinkKind::Point {
                start: Vec3::new(0.5, 0.5, 1.0),
                end: Vec3::new(3.5, 3.5, 1.0),
            },
            bidirectional: true,
            snap_radius: 0.5,
            snap_height: 0.3,
            area: 63,
            flags: 0x10,
            user_id: 77,
        }];
        build_tile_blob(TileBlobParams {
            mesh: &mesh,
            detail: None,
            links: &links,
            region_adjacency: &[(1, 2)],
            tile_x: 3,
            tile_y: -1,
            layer: 0,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.4,
        })
        .unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let blob = sample_blob();
        let bytes = blob.to_bytes().unwrap();
        let back = TileMeshBlob::from_bytes(&bytes).unwrap();
        assert_eq!(back, blob);
    }

    #[test]
    fn test_serialization_deterministic() {
        let blob = sample_blob();
        assert_eq!(blob.to_bytes().unwrap(), blob.to_bytes().unwrap());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = sample_blob().to_bytes().unwrap();
        bytes[0] ^= 0xff;
        assert!(matches!(
            TileMeshBlob::from_bytes(&bytes),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn test_truncation_rejected() {
        let bytes = sample_blob().to_bytes().unwrap();
        for cut in [3, 20, bytes.len() / 2, bytes.len() - 1] {
            assert!(TileMeshBlob::from_bytes(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn test_connected_regions_share_cluster() {
        let blob = sample_blob();
        assert_eq!(blob.cluster_count, 1);
        assert_eq!(blob.poly_clusters, vec![0, 0]);
    }

    #[test]
    fn test_disconnected_regions_get_clusters() {
        let mesh = sample_mesh();
        let blob = build_tile_blob(TileBlobParams {
            mesh: &mesh,
            detail: None,
            links: &[],
            region_adjacency: &[],
            tile_x: 0,
            tile_y: 0,
            layer: 0,
            walkable_height: 2.0,
            walkable_radius: 0.6,
            walkable_climb: 0.4,
        })
        .unwrap();
        assert_eq!(blob.cluster_count, 2);
        assert_ne!(blob.poly_clusters[0], blob.poly_clusters[1]);
    }

    #[test]
    fn test_offmesh_link_carried() {
        let blob = sample_blob();
        assert_eq!(blob.offmesh_points.len(), 1);
        let c = &blob.offmesh_points[0];
        assert!(c.bidirectional);
        assert_eq!(c.user_id, 77);
        assert_ne!(c.flags & POLY_FLAG_OFFMESH, 0);
    }
}
