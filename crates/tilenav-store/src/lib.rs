//! Tile blob format, BV-trees, salted references and the tile store.
//!
//! This crate consumes the meshes produced by `tilenav-mesh` and turns
//! them into runtime artifacts: a serialized per-layer blob, a slot arena
//! holding the live tiles, and the salted `PolyRef` encoding that keeps
//! references safe across tile replacement.

mod blob;
mod bvtree;
mod poly_ref;
mod store;

pub use blob::{
    build_tile_blob, OffMeshPointConn, OffMeshSegmentConn, TileBlobParams, TileMeshBlob,
    BLOB_MAGIC, BLOB_VERSION, POLY_FLAG_OFFMESH, POLY_FLAG_WALK,
};
pub use bvtree::{build_bv_tree, query_bv_tree, BvNode};
pub use poly_ref::{PolyRef, POLY_BITS, SALT_BITS, TILE_BITS};
pub use store::NavMeshStore;

/// Null index in packed polygon data, re-exported for blob consumers.
pub use tilenav_mesh::MESH_NULL_IDX;
