//! LRU tile cache filled by 2x2 chunk loads.
//!
//! A cache holds tiles for one plane of one image. A miss loads the whole
//! chunk containing the requested tile and fans it out into up to four
//! tiles, so neighbouring requests are usually hits.
//!
//! # Locking
//!
//! `get` and `reset` serialize on a cache-wide load lock, held across the
//! loader call, so a chunk is never loaded twice concurrently. `peek` only
//! takes a short read lock on the entry map and never waits for a load.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::pool::{Tile, TilePool};
use super::stats::{CacheCounters, TileCacheStats};
use super::types::{Plane, TileKey, TileLayout};
use crate::loader::{ChunkExtent, ChunkLoader, ChunkRequest, LoaderError};

/// State guarded by the load lock.
struct LoadState {
    plane: Plane,
    capacity: usize,
    /// Scratch buffer reused across chunk loads
    chunk: Vec<f32>,
}

/// Least-recently-used cache of image tiles for a single plane.
pub struct TileCache {
    layout: TileLayout,
    pool: Arc<TilePool>,
    state: Mutex<LoadState>,
    entries: RwLock<LruCache<TileKey, Tile>>,
    counters: CacheCounters,
}

impl TileCache {
    /// Create a cache holding up to `capacity` tiles of the default size.
    pub fn new(capacity: usize) -> Self {
        Self::with_layout(capacity, TileLayout::default())
    }

    /// Create a cache with an explicit tile layout.
    ///
    /// A capacity of zero is raised to one. The tile pool grows by the
    /// capacity on top of its chunk-sized headroom.
    pub fn with_layout(capacity: usize, layout: TileLayout) -> Self {
        let capacity = capacity.max(1);
        let pool = TilePool::new(layout.tile_len());
        pool.grow(capacity as isize);

        Self {
            layout,
            pool,
            state: Mutex::new(LoadState {
                plane: Plane::default(),
                capacity,
                chunk: Vec::new(),
            }),
            entries: RwLock::new(LruCache::unbounded()),
            counters: CacheCounters::default(),
        }
    }

    /// Return a cached tile without loading or touching recency.
    pub fn peek(&self, key: TileKey) -> Option<Tile> {
        self.entries.read().peek(&key).cloned()
    }

    /// Return a tile, loading its chunk on a miss.
    ///
    /// A hit marks the tile most recently used. Loader failures are logged
    /// and reported as `None`, leaving the cache unchanged.
    pub fn get(
        &self,
        key: TileKey,
        loader: &dyn ChunkLoader,
        io_lock: &Mutex<()>,
    ) -> Option<Tile> {
        let mut state = self.state.lock();

        if let Some(tile) = self.entries.write().get(&key).cloned() {
            self.counters.record_hit();
            return Some(tile);
        }
        self.counters.record_miss();

        let chunk_key = self.layout.chunk_key(key);
        match self.load_chunk(&mut state, chunk_key, key, loader, io_lock) {
            Ok(tile) => tile,
            Err(e) => {
                self.counters.record_load_failure();
                warn!(
                    chunk = %chunk_key,
                    plane = %state.plane,
                    error = %e,
                    "Chunk load failed"
                );
                None
            }
        }
    }

    /// Drop every tile and switch to a new plane.
    ///
    /// A positive `capacity` different from the current one resizes the
    /// cache and adjusts the pool by the difference.
    pub fn reset(&self, z: i32, stokes: i32, capacity: usize) {
        let mut state = self.state.lock();

        if capacity > 0 && capacity != state.capacity {
            self.pool
                .grow(capacity as isize - state.capacity as isize);
            state.capacity = capacity;
        }

        self.entries.write().clear();
        state.plane = Plane::new(z, stokes);
        self.counters.record_reset();
        debug!(plane = %state.plane, capacity = state.capacity, "Tile cache reset");
    }

    /// Key of the chunk containing `key`.
    pub fn chunk_key(&self, key: TileKey) -> TileKey {
        self.layout.chunk_key(key)
    }

    /// Plane the cache currently holds tiles for.
    pub fn plane(&self) -> Plane {
        self.state.lock().plane
    }

    /// Maximum number of tiles held.
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Number of tiles currently held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no tiles.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: TileKey) -> bool {
        self.entries.read().contains(&key)
    }

    /// Cached keys, most recently used first.
    pub fn keys(&self) -> Vec<TileKey> {
        self.entries.read().iter().map(|(key, _)| *key).collect()
    }

    /// Tile geometry of this cache.
    pub fn layout(&self) -> TileLayout {
        self.layout
    }

    /// The pool tiles are drawn from.
    pub fn pool(&self) -> &Arc<TilePool> {
        &self.pool
    }

    /// Cache activity counters.
    pub fn stats(&self) -> TileCacheStats {
        self.counters.snapshot()
    }

    /// Load one chunk and insert its tiles, returning the tile for `wanted`.
    ///
    /// Nothing is inserted unless the loader succeeds. Quadrants with no
    /// valid pixels are not created.
    fn load_chunk(
        &self,
        state: &mut LoadState,
        chunk_key: TileKey,
        wanted: TileKey,
        loader: &dyn ChunkLoader,
        io_lock: &Mutex<()>,
    ) -> Result<Option<Tile>, LoaderError> {
        let tile_size = self.layout.tile_size() as usize;
        let chunk_size = self.layout.chunk_size();
        let request = ChunkRequest::new(chunk_key.x, chunk_key.y, chunk_size, state.plane);

        let extent = loader.get_chunk(&request, &mut state.chunk, io_lock)?;
        validate_extent(extent, chunk_size as usize, state.chunk.len())?;

        let mut tiles = Vec::with_capacity(4);
        for (index, (dx, dy)) in self.layout.chunk_offsets().into_iter().enumerate() {
            let (col, row) = (index % 2, index / 2);
            let width = extent.width.saturating_sub(col * tile_size).min(tile_size);
            let height = extent.height.saturating_sub(row * tile_size).min(tile_size);
            if width == 0 || height == 0 {
                continue;
            }

            let mut tile = self.pool.pull();
            tile.reshape(width, height);
            for r in 0..height {
                let src = (row * tile_size + r) * extent.width + col * tile_size;
                tile.row_mut(r)
                    .copy_from_slice(&state.chunk[src..src + width]);
            }
            tiles.push((chunk_key.offset(dx, dy), Arc::new(tile)));
        }

        self.counters.record_chunk_load();
        debug!(
            chunk = %chunk_key,
            plane = %state.plane,
            width = extent.width,
            height = extent.height,
            tiles = tiles.len(),
            "Loaded chunk"
        );

        let mut entries = self.entries.write();
        let mut found = None;
        for (key, tile) in tiles {
            if key == wanted {
                found = Some(Arc::clone(&tile));
            }
            self.insert(&mut entries, key, tile, state.capacity);
        }
        Ok(found)
    }

    /// Insert as most recently used, evicting from the cold end when full.
    /// An existing entry is only touched.
    fn insert(
        &self,
        entries: &mut LruCache<TileKey, Tile>,
        key: TileKey,
        tile: Tile,
        capacity: usize,
    ) {
        if entries.contains(&key) {
            entries.promote(&key);
            return;
        }

        while entries.len() >= capacity {
            match entries.pop_lru() {
                Some((evicted, _)) => {
                    self.counters.record_eviction();
                    debug!(tile = %evicted, "Evicted tile");
                }
                None => break,
            }
        }
        entries.push(key, tile);
    }
}

fn validate_extent(
    extent: ChunkExtent,
    chunk_size: usize,
    buffer_len: usize,
) -> Result<(), LoaderError> {
    if extent.width > chunk_size || extent.height > chunk_size || buffer_len < extent.len() {
        return Err(LoaderError::InvalidExtent {
            width: extent.width,
            height: extent.height,
            size: chunk_size,
        });
    }
    Ok(())
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("layout", &self.layout)
            .field("len", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
