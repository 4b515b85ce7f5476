//! Object pool for tile buffers.
//!
//! Allocating and freeing a tile-sized buffer for every load is expensive
//! when a client scrubs through channels, so evicted tiles hand their buffer
//! back to the pool they came from. Every [`PooledTile`] holds a weak handle
//! to its pool: if the pool is gone, or already holds `capacity` spare
//! buffers, the buffer is simply freed.
//!
//! The pool capacity starts at [`CHUNK_TILES`] so that a chunk load can
//! always pull its four tiles before anything has been evicted; the owning
//! cache grows it by its own capacity.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::stats::{PoolCounters, TilePoolStats};
use super::types::CHUNK_TILES;

/// A shared, immutable tile handed out by the cache.
pub type Tile = Arc<PooledTile>;

/// Spare buffers and the bound on how many may be kept.
#[derive(Debug)]
struct PoolState {
    stack: Vec<Vec<f32>>,
    capacity: usize,
}

/// Bounded stack of reusable tile buffers.
#[derive(Debug)]
pub struct TilePool {
    tile_len: usize,
    state: Mutex<PoolState>,
    counters: PoolCounters,
}

impl TilePool {
    /// Create an empty pool for buffers of `tile_len` pixels.
    pub fn new(tile_len: usize) -> Arc<Self> {
        Arc::new(Self {
            tile_len,
            state: Mutex::new(PoolState {
                stack: Vec::new(),
                capacity: CHUNK_TILES,
            }),
            counters: PoolCounters::default(),
        })
    }

    /// Change the number of spare buffers the pool may hold by `delta`.
    ///
    /// The capacity never drops below the [`CHUNK_TILES`] headroom. When it
    /// shrinks, spare buffers beyond the new capacity are freed.
    pub fn grow(&self, delta: isize) {
        let mut state = self.state.lock();
        let capacity = (state.capacity as isize + delta).max(CHUNK_TILES as isize) as usize;
        state.capacity = capacity;

        while state.stack.len() > capacity {
            state.stack.pop();
            self.counters.record_discard();
        }
    }

    /// Take a buffer from the pool, allocating a NaN-filled one if empty.
    ///
    /// The most recently returned buffer is reused first. Its previous
    /// contents are left in place; callers overwrite what they need.
    pub fn pull(self: &Arc<Self>) -> PooledTile {
        let recycled = self.state.lock().stack.pop();

        let data = match recycled {
            Some(mut buffer) => {
                self.counters.record_reuse();
                buffer.resize(self.tile_len, f32::NAN);
                buffer
            }
            None => {
                self.counters.record_allocation();
                vec![f32::NAN; self.tile_len]
            }
        };

        let side = (self.tile_len as f64).sqrt() as usize;
        PooledTile {
            data,
            width: side,
            height: side,
            pool: Arc::downgrade(self),
        }
    }

    /// Return a buffer to the pool unconditionally.
    pub fn push(&self, buffer: Vec<f32>) {
        self.state.lock().stack.push(buffer);
        self.counters.record_return();
    }

    /// Whether the pool already holds as many spare buffers as it may keep.
    pub fn is_full(&self) -> bool {
        let state = self.state.lock();
        state.stack.len() >= state.capacity
    }

    /// Keep `buffer` if there is room, otherwise let it drop.
    ///
    /// The check and the push happen under one lock so that a burst of
    /// concurrent returns cannot overfill the stack.
    fn recycle(&self, buffer: Vec<f32>) {
        let mut state = self.state.lock();
        if state.stack.len() < state.capacity {
            state.stack.push(buffer);
            self.counters.record_return();
        } else {
            drop(state);
            self.counters.record_discard();
        }
    }

    /// Maximum number of spare buffers.
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Number of spare buffers currently held.
    pub fn available(&self) -> usize {
        self.state.lock().stack.len()
    }

    /// Number of pixels in a full buffer.
    pub fn tile_len(&self) -> usize {
        self.tile_len
    }

    /// Pool activity counters.
    pub fn stats(&self) -> TilePoolStats {
        self.counters.snapshot()
    }
}

/// Tile pixel data borrowed from a [`TilePool`].
///
/// Pixels are row-major with `width` columns. Tiles at the right and bottom
/// image edges are narrower or shorter than the full tile size.
pub struct PooledTile {
    data: Vec<f32>,
    width: usize,
    height: usize,
    pool: Weak<TilePool>,
}

impl PooledTile {
    /// Width of the valid pixel area.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height of the valid pixel area.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel values in row-major order.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at a column/row inside this tile.
    pub fn value(&self, col: usize, row: usize) -> Option<f32> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.data.get(row * self.width + col).copied()
    }

    /// Set the valid area, resizing the buffer to `width * height` pixels.
    pub(crate) fn reshape(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.data.resize(width * height, f32::NAN);
    }

    /// Mutable access to one row of the valid area.
    pub(crate) fn row_mut(&mut self, row: usize) -> &mut [f32] {
        let start = row * self.width;
        &mut self.data[start..start + self.width]
    }

    /// Mutable access to the whole buffer.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

impl Deref for PooledTile {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.data
    }
}

impl fmt::Debug for PooledTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledTile")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pooled", &(self.pool.strong_count() > 0))
            .finish()
    }
}

impl Drop for PooledTile {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.data);
        if let Some(pool) = self.pool.upgrade() {
            pool.recycle(buffer);
        }
    }
}
