//! Tile cache for image planes.
//!
//! Tiles are square blocks of one plane, loaded two-by-two as chunks and
//! kept in an LRU cache. Tile buffers come from a bounded pool and go back
//! to it when the last reference is dropped.

mod pool;
mod stats;
mod tile_cache;
mod types;

pub use pool::{PooledTile, Tile, TilePool};
pub use stats::{TileCacheStats, TilePoolStats};
pub use tile_cache::TileCache;
pub use types::{chunk_key, Plane, TileKey, TileLayout, CHUNK_TILES, MAX_TILE_CACHE_CAPACITY, TILE_SIZE};
