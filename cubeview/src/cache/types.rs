//! Core types for the tile cache.

use std::fmt;

/// Default side length of a tile in pixels.
pub const TILE_SIZE: i32 = 256;

/// Number of tiles produced by one chunk load (a 2x2 block).
pub const CHUNK_TILES: usize = 4;

/// Upper bound on the number of tiles a single cache may hold.
pub const MAX_TILE_CACHE_CAPACITY: usize = 4096;

/// Key identifying a tile by the pixel coordinate of its top-left corner.
///
/// Keys are unique within one cache, which always represents a single
/// [`Plane`]. Equality and hashing are structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    /// Column of the top-left pixel
    pub x: i32,
    /// Row of the top-left pixel
    pub y: i32,
}

impl TileKey {
    /// Create a new tile key.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Return this key shifted by the given pixel offset.
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A single (channel, polarization) slice of an image cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Plane {
    /// Channel index
    pub z: i32,
    /// Polarization index
    pub stokes: i32,
}

impl Plane {
    /// Create a new plane tag.
    pub const fn new(z: i32, stokes: i32) -> Self {
        Self { z, stokes }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "z={} stokes={}", self.z, self.stokes)
    }
}

/// Tile geometry shared by a cache, its pool and its chunk loads.
///
/// A chunk is always a 2x2 block of tiles, so the chunk side is twice the
/// tile side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    tile_size: i32,
}

impl TileLayout {
    /// Create a layout with the given tile side length.
    ///
    /// Non-positive sizes fall back to [`TILE_SIZE`].
    pub fn new(tile_size: i32) -> Self {
        let tile_size = if tile_size > 0 { tile_size } else { TILE_SIZE };
        Self { tile_size }
    }

    /// Side length of a tile in pixels.
    pub fn tile_size(&self) -> i32 {
        self.tile_size
    }

    /// Side length of a chunk in pixels.
    pub fn chunk_size(&self) -> i32 {
        self.tile_size * 2
    }

    /// Number of pixels in a full tile.
    pub fn tile_len(&self) -> usize {
        let side = self.tile_size as usize;
        side * side
    }

    /// Key of the chunk containing the given tile.
    ///
    /// Each coordinate is rounded down to a multiple of the chunk size.
    pub fn chunk_key(&self, tile_key: TileKey) -> TileKey {
        let chunk = self.chunk_size();
        TileKey::new(
            tile_key.x.div_euclid(chunk) * chunk,
            tile_key.y.div_euclid(chunk) * chunk,
        )
    }

    /// Key of the tile containing the given pixel.
    pub fn tile_key_for_pixel(&self, x: i32, y: i32) -> TileKey {
        let size = self.tile_size;
        TileKey::new(x.div_euclid(size) * size, y.div_euclid(size) * size)
    }

    /// Whether the key sits on the tile grid.
    pub fn is_aligned(&self, key: TileKey) -> bool {
        key.x.rem_euclid(self.tile_size) == 0 && key.y.rem_euclid(self.tile_size) == 0
    }

    /// Number of tiles needed to cover `extent` pixels.
    pub fn tiles_across(&self, extent: usize) -> usize {
        let size = self.tile_size as usize;
        if extent == 0 {
            0
        } else {
            (extent - 1) / size + 1
        }
    }

    /// Tile offsets within a chunk, in fan-out order.
    pub fn chunk_offsets(&self) -> [(i32, i32); CHUNK_TILES] {
        let t = self.tile_size;
        [(0, 0), (t, 0), (0, t), (t, t)]
    }
}

impl Default for TileLayout {
    fn default() -> Self {
        Self::new(TILE_SIZE)
    }
}

/// Chunk key for a tile in the default layout.
pub fn chunk_key(tile_key: TileKey) -> TileKey {
    TileLayout::default().chunk_key(tile_key)
}
