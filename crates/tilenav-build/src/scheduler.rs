//! Incremental build scheduling.
//!
//! Dirty-area events are expanded into tile coordinates, merged per
//! coordinate and baked on a bounded worker pool, nearest seed first.
//! Completed bakes are merged into the store and the layer cache and the
//! affected coordinates are published to an observer channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use glam::Vec3;
use log::{debug, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tilenav_cache::LayerCache;
use tilenav_common::{tile_range_for_bounds, Error, Result, TileBounds, TileCoord};
use tilenav_mesh::NavMeshConfig;
use tilenav_store::NavMeshStore;

use crate::generator::{BuildCounters, TileBuildOutput, TileGenerator};
use crate::source::{GatherMode, GeometrySource};

/// What a dirty event invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyFlags(u8);

impl DirtyFlags {
    /// Source geometry changed; cached layers are stale.
    pub const GEOMETRY: Self = Self(1 << 0);
    /// Navigable bounds changed; treated like a geometry change.
    pub const BOUNDS: Self = Self(1 << 1);
    /// Only area modifiers changed; cached layers stay valid.
    pub const MODIFIER: Self = Self(1 << 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for DirtyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A world-space invalidation reported by the host application.
#[derive(Debug, Clone, Copy)]
pub struct DirtyEvent {
    pub bounds: TileBounds,
    pub flags: DirtyFlags,
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on tile bakes in flight.
    pub max_concurrent_tile_tasks: usize,
    /// Worker pool size.
    pub worker_threads: usize,
    pub gather_mode: GatherMode,
    /// Tile slot capacity. Derived from the inclusion volumes when `None`.
    pub max_tiles: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tile_tasks: 4,
            worker_threads: 2,
            gather_mode: GatherMode::OnSubmit,
            max_tiles: None,
        }
    }
}

struct PendingTile {
    flags: DirtyFlags,
    seq: u64,
}

struct RunningTile {
    discard: Arc<AtomicBool>,
}

/// Coordinator-owned queues. One mutex guards all of them; workers never
/// touch this state, they only report over the completion channel.
#[derive(Default)]
struct SchedulerState {
    pending: HashMap<TileCoord, PendingTile>,
    running: HashMap<TileCoord, RunningTile>,
    seeds: Vec<Vec3>,
    next_seq: u64,
}

struct TaskResult {
    coord: TileCoord,
    outcome: Result<TileBuildOutput>,
    discard: Arc<AtomicBool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drives incremental tile rebuilds against one geometry source.
///
/// All methods take `&self`; internal state lives behind mutexes so the
/// scheduler can be shared across the host's threads. Per coordinate at
/// most one pending and one running entry exist at a time; a dirty event
/// for a running tile queues a fresh pending entry that runs after the
/// current bake completes.
pub struct BuildScheduler {
    config: NavMeshConfig,
    source: Arc<dyn GeometrySource>,
    generator: Arc<TileGenerator>,
    store: Mutex<NavMeshStore>,
    cache: Arc<LayerCache>,
    counters: Arc<BuildCounters>,
    state: Mutex<SchedulerState>,
    pool: ThreadPool,
    max_concurrent: usize,
    gather_mode: GatherMode,
    gather_lock: Arc<Mutex<()>>,
    tx_done: Sender<TaskResult>,
    rx_done: Receiver<TaskResult>,
    tx_observer: Sender<Vec<TileCoord>>,
    rx_observer: Receiver<Vec<TileCoord>>,
}

impl BuildScheduler {
    pub fn new(
        config: NavMeshConfig,
        sched: SchedulerConfig,
        source: Arc<dyn GeometrySource>,
    ) -> Result<Self> {
        config.validate()?;
        let counters = Arc::new(BuildCounters::default());
        let generator = Arc::new(TileGenerator::new(config.clone(), counters.clone())?);

        let volumes = source.inclusion_volumes();
        let max_tiles = sched
            .max_tiles
            .unwrap_or_else(|| derive_max_tiles(&config, &volumes));
        let store = Mutex::new(NavMeshStore::new(max_tiles)?);

        let pool = ThreadPoolBuilder::new()
            .num_threads(sched.worker_threads.max(1))
            .thread_name(|i| format!("tile-build-{i}"))
            .build()
            .map_err(|e| Error::InvalidData(format!("worker pool: {e}")))?;

        let (tx_done, rx_done) = unbounded();
        let (tx_observer, rx_observer) = unbounded();
        Ok(Self {
            config,
            source,
            generator,
            store,
            cache: Arc::new(LayerCache::new()),
            counters,
            state: Mutex::new(SchedulerState::default()),
            pool,
            max_concurrent: sched.max_concurrent_tile_tasks.max(1),
            gather_mode: sched.gather_mode,
            gather_lock: Arc::new(Mutex::new(())),
            tx_done,
            rx_done,
            tx_observer,
            rx_observer,
        })
    }

    pub fn config(&self) -> &NavMeshConfig {
        &self.config
    }

    pub fn counters(&self) -> &BuildCounters {
        &self.counters
    }

    pub fn cache(&self) -> &LayerCache {
        &self.cache
    }

    /// The committed tile store. Mutation happens only on the merge path,
    /// so holding the guard briefly for queries is safe.
    pub fn store(&self) -> MutexGuard<'_, NavMeshStore> {
        lock(&self.store)
    }

    /// Channel carrying batches of tile coordinates whose store content
    /// changed. Clone per observer.
    pub fn completed_tiles(&self) -> Receiver<Vec<TileCoord>> {
        self.rx_observer.clone()
    }

    /// Build priority: tiles nearest a seed point bake first. Typically
    /// the active viewer positions.
    pub fn set_seed_points(&self, seeds: Vec<Vec3>) {
        lock(&self.state).seeds = seeds;
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn running_count(&self) -> usize {
        lock(&self.state).running.len()
    }

    /// Expands a dirty event into per-tile pending entries. Tiles outside
    /// every inclusion volume are skipped; for an already-pending tile the
    /// flags merge, so a geometry flag dominates a modifier-only request.
    pub fn mark_dirty(&self, event: &DirtyEvent) {
        let volumes = self.source.inclusion_volumes();
        let tws = self.config.tile_world_size();
        let (lo, hi) =
            tile_range_for_bounds(self.config.origin, tws, event.bounds.min, event.bounds.max);

        let mut state = lock(&self.state);
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                let coord = TileCoord::new(x, y);
                let tb = TileBounds::of_tile(
                    self.config.origin,
                    tws,
                    coord,
                    self.config.z_min,
                    self.config.z_max,
                );
                if !tb.intersects(&event.bounds) {
                    continue;
                }
                if !volumes.iter().any(|v| v.intersects(&tb)) {
                    continue;
                }
                let seq = state.next_seq;
                state.next_seq += 1;
                state
                    .pending
                    .entry(coord)
                    .and_modify(|p| p.flags = p.flags | event.flags)
                    .or_insert(PendingTile {
                        flags: event.flags,
                        seq,
                    });
            }
        }
    }

    /// Cancels work on one coordinate: the pending entry is dropped and a
    /// running bake is marked discard. Discarding does not stop in-flight
    /// CPU work, it only suppresses the merge of its result.
    pub fn discard(&self, coord: TileCoord) {
        let mut state = lock(&self.state);
        state.pending.remove(&coord);
        if let Some(running) = state.running.get(&coord) {
            running.discard.store(true, Ordering::Relaxed);
        }
    }

    /// One coordinator step: merge finished bakes, then top the worker
    /// pool back up. Returns the coordinates merged this step.
    pub fn update(&self) -> Vec<TileCoord> {
        let mut completed = Vec::new();
        while let Ok(res) = self.rx_done.try_recv() {
            if let Some(coord) = self.complete(res) {
                completed.push(coord);
            }
        }
        if !completed.is_empty() {
            let _ = self.tx_observer.send(completed.clone());
        }
        self.submit_ready();
        completed
    }

    /// Blocks until every pending and running bake has completed, or the
    /// timeout passes. Returns `true` when idle was reached.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.submit_ready();
            {
                let state = lock(&self.state);
                if state.pending.is_empty() && state.running.is_empty() {
                    return true;
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx_done.recv_timeout(remaining) {
                Ok(res) => {
                    if let Some(coord) = self.complete(res) {
                        let _ = self.tx_observer.send(vec![coord]);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return false;
                }
            }
        }
    }

    /// Handles one finished task. Returns the coordinate when its result
    /// was merged into the store.
    fn complete(&self, res: TaskResult) -> Option<TileCoord> {
        lock(&self.state).running.remove(&res.coord);

        if res.discard.load(Ordering::Relaxed) {
            self.counters.dropped_results.fetch_add(1, Ordering::Relaxed);
            debug!("tile ({}, {}): result discarded", res.coord.x, res.coord.y);
            return None;
        }
        match res.outcome {
            Ok(output) => match self.merge(output) {
                Ok(()) => Some(res.coord),
                Err(e) => {
                    warn!("tile ({}, {}): merge failed: {e}", res.coord.x, res.coord.y);
                    self.counters.failed_builds.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Err(e) => {
                warn!("tile ({}, {}): build failed: {e}", res.coord.x, res.coord.y);
                self.counters.failed_builds.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Commits a bake: layers present in the output replace their store
    /// slots, stale higher layers are removed, fresh compressed layers go
    /// to the cache. On failure the previous tile stays authoritative.
    fn merge(&self, output: TileBuildOutput) -> Result<()> {
        let coord = output.coord;
        {
            let mut store = lock(&self.store);
            let existing: Vec<u16> = store
                .get_tiles_at(coord)
                .iter()
                .map(|b| b.layer)
                .collect();
            let kept: Vec<u16> = output.blobs.iter().map(|b| b.layer).collect();
            for blob in output.blobs {
                store.replace_tile(blob)?;
            }
            for layer in existing {
                if !kept.contains(&layer) {
                    store.remove_tile(coord, layer);
                }
            }
        }
        if let Some(layers) = output.new_layers {
            self.cache.store_layers(coord, layers);
        }
        Ok(())
    }

    /// Dispatches pending tiles until the in-flight limit is reached,
    /// nearest seed first. A coordinate already running is left pending.
    fn submit_ready(&self) {
        loop {
            let (coord, flags, discard) = {
                let mut state = lock(&self.state);
                if state.running.len() >= self.max_concurrent {
                    return;
                }
                let Some(coord) = pick_next(&state, &self.config) else {
                    return;
                };
                let Some(pending) = state.pending.remove(&coord) else {
                    return;
                };
                let discard = Arc::new(AtomicBool::new(false));
                state.running.insert(
                    coord,
                    RunningTile {
                        discard: discard.clone(),
                    },
                );
                (coord, pending.flags, discard)
            };
            self.spawn_task(coord, flags, discard);
        }
    }

    fn spawn_task(&self, coord: TileCoord, flags: DirtyFlags, discard: Arc<AtomicBool>) {
        let geometry_dirty = flags.intersects(DirtyFlags::GEOMETRY | DirtyFlags::BOUNDS);
        let border_world = self.config.border_size() as f32 * self.config.cell_size;
        let bounds = TileBounds::of_tile(
            self.config.origin,
            self.config.tile_world_size(),
            coord,
            self.config.z_min,
            self.config.z_max,
        )
        .expanded(border_world);

        let cached = self.cache.get_layers(coord);
        let generator = self.generator.clone();
        let source = self.source.clone();
        let tx = self.tx_done.clone();

        match self.gather_mode {
            GatherMode::OnSubmit => {
                let gathered = source.gather(coord, &bounds);
                self.pool.spawn(move || {
                    let outcome = gathered.and_then(|batch| {
                        let volumes = source.inclusion_volumes();
                        generator.build_tile(coord, &batch, &volumes, cached, geometry_dirty)
                    });
                    let _ = tx.send(TaskResult {
                        coord,
                        outcome,
                        discard,
                    });
                });
            }
            GatherMode::InTask => {
                let gather_lock = self.gather_lock.clone();
                self.pool.spawn(move || {
                    let gathered = {
                        let _serial = gather_lock.lock().unwrap_or_else(|e| e.into_inner());
                        source.gather(coord, &bounds)
                    };
                    let outcome = gathered.and_then(|batch| {
                        let volumes = source.inclusion_volumes();
                        generator.build_tile(coord, &batch, &volumes, cached, geometry_dirty)
                    });
                    let _ = tx.send(TaskResult {
                        coord,
                        outcome,
                        discard,
                    });
                });
            }
        }
    }
}

/// Highest-priority pending coordinate not currently running: nearest to
/// any seed, submission order breaking ties (and used alone when no seeds
/// are set).
fn pick_next(state: &SchedulerState, config: &NavMeshConfig) -> Option<TileCoord> {
    let tws = config.tile_world_size();
    state
        .pending
        .iter()
        .filter(|(coord, _)| !state.running.contains_key(coord))
        .min_by(|(ca, pa), (cb, pb)| {
            let da = seed_distance_sq(state, config, tws, **ca);
            let db = seed_distance_sq(state, config, tws, **cb);
            da.total_cmp(&db)
                .then_with(|| pa.seq.cmp(&pb.seq))
                .then_with(|| ca.cmp(cb))
        })
        .map(|(coord, _)| *coord)
}

fn seed_distance_sq(
    state: &SchedulerState,
    config: &NavMeshConfig,
    tws: f32,
    coord: TileCoord,
) -> f32 {
    if state.seeds.is_empty() {
        return 0.0;
    }
    let cx = config.origin.x + (coord.x as f32 + 0.5) * tws;
    let cy = config.origin.y + (coord.y as f32 + 0.5) * tws;
    state
        .seeds
        .iter()
        .map(|s| {
            let dx = s.x - cx;
            let dy = s.y - cy;
            dx * dx + dy * dy
        })
        .fold(f32::MAX, f32::min)
}

/// Tile capacity from the navigable extent: every coordinate an inclusion
/// volume touches, with headroom for vertically stacked layers.
fn derive_max_tiles(config: &NavMeshConfig, volumes: &[TileBounds]) -> usize {
    let tws = config.tile_world_size();
    let mut coords = HashSet::new();
    for v in volumes {
        let (lo, hi) = tile_range_for_bounds(config.origin, tws, v.min, v.max);
        for y in lo.y..=hi.y {
            for x in lo.x..=hi.x {
                coords.insert((x, y));
            }
        }
    }
    (coords.len().max(1)) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_flags_ops() {
        let f = DirtyFlags::GEOMETRY | DirtyFlags::MODIFIER;
        assert!(f.contains(DirtyFlags::GEOMETRY));
        assert!(f.contains(DirtyFlags::MODIFIER));
        assert!(!f.contains(DirtyFlags::BOUNDS));
        assert!(f.intersects(DirtyFlags::GEOMETRY | DirtyFlags::BOUNDS));
        assert!(!DirtyFlags::MODIFIER.intersects(DirtyFlags::GEOMETRY | DirtyFlags::BOUNDS));
    }

    #[test]
    fn test_derive_max_tiles_counts_covered_coords() {
        let config = NavMeshConfig::default();
        let tws = config.tile_world_size();
        let volumes = vec![TileBounds {
            min: Vec3::new(0.1, 0.1, -1.0),
            max: Vec3::new(tws * 2.0 - 0.1, tws - 0.1, 1.0),
        }];
        // Two coordinates covered, four layer slots each.
        assert_eq!(derive_max_tiles(&config, &volumes), 8);
    }

    #[test]
    fn test_derive_max_tiles_empty_volumes() {
        let config = NavMeshConfig::default();
        assert_eq!(derive_max_tiles(&config, &[]), 4);
    }
}
