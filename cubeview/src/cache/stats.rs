//! Tile cache and pool statistics.
//!
//! Counters are updated lock-free from the hot paths and read back as plain
//! snapshot structs for logging and tests.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of tile cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileCacheStats {
    /// `get` calls answered from the cache
    pub hits: u64,
    /// `get` calls that required a chunk load
    pub misses: u64,
    /// Successful chunk loads
    pub chunk_loads: u64,
    /// Chunk loads rejected by the loader
    pub load_failures: u64,
    /// Tiles evicted to make room for newer ones
    pub evictions: u64,
    /// Number of `reset` calls
    pub resets: u64,
}

impl TileCacheStats {
    /// Fraction of `get` calls served without a load (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Snapshot of tile pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TilePoolStats {
    /// Buffers allocated because the pool was empty
    pub allocations: u64,
    /// Buffers handed out again after being returned
    pub reuses: u64,
    /// Buffers returned to the pool
    pub returns: u64,
    /// Buffers freed because the pool was full
    pub discards: u64,
}

impl TilePoolStats {
    /// Fraction of pulls served from recycled buffers (0.0 to 1.0).
    pub fn reuse_rate(&self) -> f64 {
        let total = self.allocations + self.reuses;
        if total == 0 {
            0.0
        } else {
            self.reuses as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    chunk_loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    resets: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk_load(&self) {
        self.chunk_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TileCacheStats {
        TileCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            chunk_loads: self.chunk_loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    allocations: AtomicU64,
    reuses: AtomicU64,
    returns: AtomicU64,
    discards: AtomicU64,
}

impl PoolCounters {
    pub(crate) fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reuse(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_return(&self) {
        self.returns.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discard(&self) {
        self.discards.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> TilePoolStats {
        TilePoolStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
        }
    }
}
