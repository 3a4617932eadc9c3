//! Bounding-volume tree over tile polygons.
//!
//! A flat array of quantized AABB nodes in depth-first order. Internal
//! nodes store the negated size of their subtree so a query can skip it
//! in one step; leaves store the polygon index.

use tilenav_mesh::PolyMesh;

/// One node of the flattened tree. `index >= 0` is a leaf holding a
/// polygon index; `index < 0` is an internal node whose subtree (itself
/// included) spans `-index` array entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BvNode {
    pub bmin: [u16; 3],
    pub bmax: [u16; 3],
    pub index: i32,
}

struct Item {
    bmin: [u16; 3],
    bmax: [u16; 3],
    poly: u32,
}

/// Builds the tree from the polygon mesh, in vertex cell coordinates.
pub fn build_bv_tree(mesh: &PolyMesh) -> Vec<BvNode> {
    let mut items: Vec<Item> = (0..mesh.poly_count())
        .map(|p| {
            let mut bmin = [u16::MAX; 3];
            let mut bmax = [0u16; 3];
            for &vi in mesh.poly_verts(p) {
                let v = mesh.verts[vi as usize];
                for k in 0..3 {
                    bmin[k] = bmin[k].min(v[k]);
                    bmax[k] = bmax[k].max(v[k]);
                }
            }
            Item {
                bmin,
                bmax,
                poly: p as u32,
            }
        })
        .collect();

    let mut nodes = Vec::with_capacity(mesh.poly_count() * 2);
    if !items.is_empty() {
        subdivide(&mut items, &mut nodes);
    }
    nodes
}

fn bounds_of(items: &[Item]) -> ([u16; 3], [u16; 3]) {
    let mut bmin = [u16::MAX; 3];
    let mut bmax = [0u16; 3];
    for it in items {
        for k in 0..3 {
            bmin[k] = bmin[k].min(it.bmin[k]);
            bmax[k] = bmax[k].max(it.bmax[k]);
        }
    }
    (bmin, bmax)
}

fn subdivide(items: &mut [Item], nodes: &mut Vec<BvNode>) {
    if items.len() == 1 {
        nodes.push(BvNode {
            bmin: items[0].bmin,
            bmax: items[0].bmax,
            index: items[0].poly as i32,
        });
        return;
    }
    let (bmin, bmax) = bounds_of(items);
    let ext = [
        bmax[0] - bmin[0],
        bmax[1] - bmin[1],
        bmax[2] - bmin[2],
    ];
    let axis = if ext[0] >= ext[1] && ext[0] >= ext[2] {
        0
    } else if ext[1] >= ext[2] {
        1
    } else {
        2
    };
    items.sort_by_key(|it| it.bmin[axis]);

    let here = nodes.len();
    nodes.push(BvNode {
        bmin,
        bmax,
        index: 0, // patched below
    });
    let mid = items.len() / 2;
    let (lo, hi) = items.split_at_mut(mid);
    subdivide(lo, nodes);
    subdivide(hi, nodes);
    let size = (nodes.len() - here) as i32;
    nodes[here].index = -size;
}

#[inline]
fn overlap(amin: [u16; 3], amax: [u16; 3], bmin: [u16; 3], bmax: [u16; 3]) -> bool {
    amin[0] <= bmax[0]
        && amax[0] >= bmin[0]
        && amin[1] <= bmax[1]
        && amax[1] >= bmin[1]
        && amin[2] <= bmax[2]
        && amax[2] >= bmin[2]
}

/// Collects the polygon indices whose bounds overlap the query box.
pub fn query_bv_tree(nodes: &[BvNode], bmin: [u16; 3], bmax: [u16; 3]) -> Vec<u32> {
    let mut hits = Vec::new();
    let mut i = 0;
    while i < nodes.len() {
        let n = &nodes[i];
        if overlap(bmin, bmax, n.bmin, n.bmax) {
            if n.index >= 0 {
                hits.push(n.index as u32);
            }
            i += 1;
        } else if n.index >= 0 {
            i += 1;
        } else {
            i += (-n.index) as usize;
        }
    }
    hits
}
