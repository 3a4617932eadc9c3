//! Single-tile bake: geometry in, layer blobs out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Vec3;
use log::{debug, warn};
use tilenav_cache::{compress_layer, decompress_layer, CompressedLayer};
use tilenav_common::{Error, Result, TileBounds, TileCoord};
use tilenav_mesh::{
    build_contours, build_detail_mesh, build_layer_grids, build_poly_mesh, build_regions,
    erode_walkable_area, filter_inclusion_bounds, mark_modifiers, rasterize_batch,
    CompactHeightfield, GeometryBatch, Heightfield, LayerGrid, NavMeshConfig, OffMeshLink,
    OffMeshLinkKind,
};
use tilenav_store::{build_tile_blob, TileBlobParams, TileMeshBlob};

/// Build statistics, shared between the scheduler and its workers.
#[derive(Debug, Default)]
pub struct BuildCounters {
    /// Tiles baked from raw geometry.
    pub full_builds: AtomicU64,
    /// Tiles baked from cached layers, skipping rasterization.
    pub cache_builds: AtomicU64,
    /// Tile bakes that ended in an error.
    pub failed_builds: AtomicU64,
    /// Completed results dropped because the tile was discarded.
    pub dropped_results: AtomicU64,
}

impl BuildCounters {
    pub fn full_builds(&self) -> u64 {
        self.full_builds.load(Ordering::Relaxed)
    }

    pub fn cache_builds(&self) -> u64 {
        self.cache_builds.load(Ordering::Relaxed)
    }

    pub fn failed_builds(&self) -> u64 {
        self.failed_builds.load(Ordering::Relaxed)
    }

    pub fn dropped_results(&self) -> u64 {
        self.dropped_results.load(Ordering::Relaxed)
    }
}

/// Result of one tile bake.
#[derive(Debug)]
pub struct TileBuildOutput {
    pub coord: TileCoord,
    /// One blob per surviving layer, ordered by layer index. Empty when the
    /// tile has no walkable surface; the merge step then removes the tile.
    pub blobs: Vec<TileMeshBlob>,
    /// Freshly compressed layers to store back into the cache. `None` when
    /// the bake ran from cached layers, which stay valid as-is.
    pub new_layers: Option<Vec<CompressedLayer>>,
}

/// Bakes one tile at a time. Stateless apart from shared counters, so one
/// generator serves every worker thread.
pub struct TileGenerator {
    config: NavMeshConfig,
    counters: Arc<BuildCounters>,
}

impl TileGenerator {
    pub fn new(config: NavMeshConfig, counters: Arc<BuildCounters>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, counters })
    }

    pub fn config(&self) -> &NavMeshConfig {
        &self.config
    }

    /// Bakes `coord` from `batch`, reusing `cached` layers when the
    /// geometry is unchanged. An undecodable cached layer falls back to
    /// a full geometry bake instead of failing the tile.
    pub fn build_tile(
        &self,
        coord: TileCoord,
        batch: &GeometryBatch,
        volumes: &[TileBounds],
        cached: Option<Vec<CompressedLayer>>,
        geometry_dirty: bool,
    ) -> Result<TileBuildOutput> {
        if !geometry_dirty {
            if let Some(layers) = cached.filter(|l| !l.is_empty()) {
                match self.build_from_cache(coord, batch, &layers) {
                    Ok(out) => {
                        self.counters.cache_builds.fetch_add(1, Ordering::Relaxed);
                        return Ok(out);
                    }
                    Err(Error::CompressionFailure(msg)) => {
                        warn!(
                            "tile ({}, {}): cached layer unusable ({msg}), rebuilding from geometry",
                            coord.x, coord.y
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        self.counters.full_builds.fetch_add(1, Ordering::Relaxed);
        self.build_from_geometry(coord, batch, volumes)
    }

    fn build_from_geometry(
        &self,
        coord: TileCoord,
        batch: &GeometryBatch,
        volumes: &[TileBounds],
    ) -> Result<TileBuildOutput> {
        if batch.is_empty() {
            // No input means no walkable surface; the merge step clears the
            // tile and its cache entry.
            return Ok(TileBuildOutput {
                coord,
                blobs: Vec::new(),
                new_layers: Some(Vec::new()),
            });
        }

        let config = &self.config;
        let bounds = TileBounds::of_tile(
            config.origin,
            config.tile_world_size(),
            coord,
            config.z_min,
            config.z_max,
        );
        let border_world = config.border_size() as f32 * config.cell_size;
        let grid_size = config.grid_size();
        let bmin = Vec3::new(
            bounds.min.x - border_world,
            bounds.min.y - border_world,
            bounds.min.z,
        );
        let bmax = Vec3::new(
            bounds.max.x + border_world,
            bounds.max.y + border_world,
            bounds.max.z,
        );

        let mut hf = Heightfield::new(
            grid_size,
            grid_size,
            bmin,
            bmax,
            config.cell_size,
            config.cell_height,
        );
        let tris = rasterize_batch(&mut hf, batch, config)?;
        debug!(
            "tile ({}, {}): rasterized {tris} triangles into {} spans",
            coord.x,
            coord.y,
            hf.walkable_span_count()
        );

        hf.filter_low_hanging_obstacles(config.walkable_climb);
        hf.filter_ledge_spans(config.walkable_height, config.walkable_climb);
        hf.filter_low_height_spans(config.walkable_height, config.mark_low_areas);
        if !volumes.iter().any(|v| v.contains(&bounds)) {
            filter_inclusion_bounds(
                &mut hf,
                volumes,
                config.walkable_radius as f32 * config.cell_size,
            );
        }

        let mut chf = CompactHeightfield::build_from_heightfield(
            &hf,
            config.walkable_height,
            config.walkable_climb,
        )?;
        erode_walkable_area(&mut chf, config.walkable_radius);

        let grids = build_layer_grids(&chf, coord.x, coord.y)?;
        let mut new_layers = Vec::with_capacity(grids.len());
        let mut blobs = Vec::new();
        for mut grid in grids {
            // Cached layers are pre-modifier so a later modifier-only
            // rebuild can replay a different modifier set.
            new_layers.push(compress_layer(&grid)?);
            if let Some(blob) = self.build_layer(&mut grid, batch)? {
                blobs.push(blob);
            }
        }

        Ok(TileBuildOutput {
            coord,
            blobs,
            new_layers: Some(new_layers),
        })
    }

    fn build_from_cache(
        &self,
        coord: TileCoord,
        batch: &GeometryBatch,
        cached: &[CompressedLayer],
    ) -> Result<TileBuildOutput> {
        let mut blobs = Vec::new();
        for layer in cached {
            let mut grid = decompress_layer(layer)?;
            if let Some(blob) = self.build_layer(&mut grid, batch)? {
                blobs.push(blob);
            }
        }
        Ok(TileBuildOutput {
            coord,
            blobs,
            new_layers: None,
        })
    }

    /// Runs the layer pipeline: modifiers, regions, contours, polygons,
    /// detail, blob. Returns `None` when the layer yields no polygons.
    fn build_layer(
        &self,
        grid: &mut LayerGrid,
        batch: &GeometryBatch,
    ) -> Result<Option<TileMeshBlob>> {
        let config = &self.config;
        mark_modifiers(grid, &batch.modifiers, config);

        let border = config.border_size();
        let regions = build_regions(grid, config, border)?;
        if regions.count == 0 {
            return Ok(None);
        }
        let cset = build_contours(grid, &regions, config, border)?;
        let mesh = build_poly_mesh(&cset, grid, config)?;
        if mesh.poly_count() == 0 {
            return Ok(None);
        }
        let detail = if config.detail_sample_dist > 0.0 {
            Some(build_detail_mesh(&mesh, grid, config)?)
        } else {
            None
        };

        let links = layer_links(&batch.links, grid, config);
        let blob = build_tile_blob(TileBlobParams {
            mesh: &mesh,
            detail: detail.as_ref(),
            links: &links,
            region_adjacency: &cset.adjacency,
            tile_x: grid.tile_x,
            tile_y: grid.tile_y,
            layer: grid.layer,
            walkable_height: config.walkable_height as f32 * config.cell_height,
            walkable_radius: config.walkable_radius as f32 * config.cell_size,
            walkable_climb: config.walkable_climb as f32 * config.cell_height,
        })?;
        Ok(Some(blob))
    }
}

/// Off-mesh links whose start height falls within this layer's vertical
/// range, expanded by the climb allowance.
fn layer_links(
    links: &[OffMeshLink],
    grid: &LayerGrid,
    config: &NavMeshConfig,
) -> Vec<OffMeshLink> {
    let slack = config.walkable_climb as f32 * config.cell_height;
    let lo = grid.bmin.z - slack;
    let hi = grid.bmax.z + slack;
    links
        .iter()
        .filter(|link| {
            let z = match link.kind {
                OffMeshLinkKind::Point { start, .. } => start.z,
                OffMeshLinkKind::Segment { start, .. } => start.0.z,
            };
            (lo..=hi).contains(&z)
        })
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilenav_mesh::GeometryChunk;

    fn plate_batch(size: f32, z: f32) -> GeometryBatch {
        let vertices = vec![
            Vec3::new(0.0, 0.0, z),
            Vec3::new(size, 0.0, z),
            Vec3::new(size, size, z),
            Vec3::new(0.0, size, z),
        ];
        GeometryBatch {
            chunks: vec![GeometryChunk {
                vertices,
                indices: vec![0, 1, 2, 0, 2, 3],
                slope_override_deg: None,
            }],
            modifiers: Vec::new(),
            links: Vec::new(),
        }
    }

    fn test_config() -> NavMeshConfig {
        NavMeshConfig {
            tile_size: 48,
            z_min: -10.0,
            z_max: 10.0,
            ..NavMeshConfig::default()
        }
    }

    fn volumes(config: &NavMeshConfig) -> Vec<TileBounds> {
        vec![TileBounds {
            min: Vec3::new(-100.0, -100.0, config.z_min),
            max: Vec3::new(100.0, 100.0, config.z_max),
        }]
    }

    #[test]
    fn test_flat_plate_single_layer() {
        let config = test_config();
        let vols = volumes(&config);
        let generator =
            TileGenerator::new(config.clone(), Arc::new(BuildCounters::default())).unwrap();
        let out = generator
            .build_tile(
                TileCoord::new(0, 0),
                &plate_batch(10.0, 0.0),
                &vols,
                None,
                true,
            )
            .unwrap();

        assert_eq!(out.blobs.len(), 1);
        let blob = &out.blobs[0];
        assert_eq!(blob.layer, 0);
        assert!(blob.poly_count() >= 1);
        assert!(blob.offmesh_points.is_empty());
        assert!(blob.offmesh_segments.is_empty());

        // Bounding box covers the plate plus the border padding.
        let pad = config.border_size() as f32 * config.cell_size;
        assert!(blob.bmin.x <= 0.0 && blob.bmin.x >= -pad - 1e-3);
        assert!(blob.bmax.x >= 10.0);

        let layers = out.new_layers.unwrap();
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn test_empty_batch_produces_no_layers() {
        let config = test_config();
        let vols = volumes(&config);
        let generator = TileGenerator::new(config, Arc::new(BuildCounters::default())).unwrap();
        let out = generator
            .build_tile(
                TileCoord::new(0, 0),
                &GeometryBatch::default(),
                &vols,
                None,
                true,
            )
            .unwrap();
        assert!(out.blobs.is_empty());
        assert_eq!(out.new_layers, Some(Vec::new()));
    }

    #[test]
    fn test_determinism() {
        let config = test_config();
        let vols = volumes(&config);
        let generator = TileGenerator::new(config, Arc::new(BuildCounters::default())).unwrap();
        let batch = plate_batch(10.0, 0.0);
        let a = generator
            .build_tile(TileCoord::new(0, 0), &batch, &vols, None, true)
            .unwrap();
        let b = generator
            .build_tile(TileCoord::new(0, 0), &batch, &vols, None, true)
            .unwrap();
        assert_eq!(a.blobs.len(), b.blobs.len());
        for (ba, bb) in a.blobs.iter().zip(&b.blobs) {
            assert_eq!(ba.to_bytes().unwrap(), bb.to_bytes().unwrap());
        }
        assert_eq!(a.new_layers, b.new_layers);
    }

    #[test]
    fn test_cache_path_skips_rasterization() {
        let config = test_config();
        let vols = volumes(&config);
        let counters = Arc::new(BuildCounters::default());
        let generator = TileGenerator::new(config, counters.clone()).unwrap();
        let batch = plate_batch(10.0, 0.0);

        let full = generator
            .build_tile(TileCoord::new(0, 0), &batch, &vols, None, true)
            .unwrap();
        let cached = full.new_layers.clone().unwrap();
        assert_eq!(counters.full_builds(), 1);

        let reused = generator
            .build_tile(TileCoord::new(0, 0), &batch, &vols, Some(cached), false)
            .unwrap();
        assert_eq!(counters.cache_builds(), 1);
        assert_eq!(counters.full_builds(), 1);
        assert!(reused.new_layers.is_none());
        assert_eq!(reused.blobs.len(), full.blobs.len());
        assert_eq!(
            reused.blobs[0].to_bytes().unwrap(),
            full.blobs[0].to_bytes().unwrap()
        );
    }

    #[test]
    fn test_corrupt_cache_falls_back_to_full_build() {
        let config = test_config();
        let vols = volumes(&config);
        let counters = Arc::new(BuildCounters::default());
        let generator = TileGenerator::new(config, counters.clone()).unwrap();
        let batch = plate_batch(10.0, 0.0);

        let full = generator
            .build_tile(TileCoord::new(0, 0), &batch, &vols, None, true)
            .unwrap();
        let mut cached = full.new_layers.unwrap();
        cached[0].bytes.truncate(3);

        let out = generator
            .build_tile(TileCoord::new(0, 0), &batch, &vols, Some(cached), false)
            .unwrap();
        assert_eq!(counters.cache_builds(), 0);
        assert_eq!(counters.full_builds(), 2);
        assert!(out.new_layers.is_some());
    }
}
