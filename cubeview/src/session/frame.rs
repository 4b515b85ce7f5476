//! One open image within a session.

use std::sync::Arc;

use crate::cache::{Plane, Tile, TileCache, TileKey, MAX_TILE_CACHE_CAPACITY};
use crate::loader::{ImageShape, OpenImage};
use crate::sync::QueuingRwLock;

use super::{SessionError, SessionSettings};

/// An image opened under a client-chosen file id, with its own tile cache.
///
/// The current plane sits behind a queueing RW lock: tile and cursor reads
/// hold it shared for the whole lookup, a plane change holds it exclusively
/// while the cache is reset. A tile is therefore always reported with the
/// plane it was read from.
pub struct Frame {
    file_id: i32,
    image: Arc<OpenImage>,
    cache: TileCache,
    plane: QueuingRwLock<Plane>,
}

impl Frame {
    /// Open `image` at plane (0, 0).
    ///
    /// The cache holds enough tiles for two full passes around the image
    /// edge: `2 * (tiles_x + tiles_y)`, capped by the settings.
    pub fn new(file_id: i32, image: Arc<OpenImage>, settings: &SessionSettings) -> Self {
        let shape = image.shape();
        let layout = settings.layout;
        let tiles = layout.tiles_across(shape.width) + layout.tiles_across(shape.height);
        let capacity = (2 * tiles)
            .min(settings.max_tile_capacity)
            .min(MAX_TILE_CACHE_CAPACITY);

        Self {
            file_id,
            image,
            cache: TileCache::with_layout(capacity, layout),
            plane: QueuingRwLock::new(Plane::default()),
        }
    }

    pub fn file_id(&self) -> i32 {
        self.file_id
    }

    pub fn image(&self) -> &Arc<OpenImage> {
        &self.image
    }

    pub fn shape(&self) -> ImageShape {
        self.image.shape()
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Plane currently displayed.
    pub fn plane(&self) -> Plane {
        *self.plane.read()
    }

    /// Switch to `plane`, dropping cached tiles if it changed.
    ///
    /// Returns whether the plane changed.
    pub fn set_plane(&self, plane: Plane) -> Result<bool, SessionError> {
        let shape = self.shape();
        if !shape.contains_plane(plane) {
            return Err(SessionError::PlaneOutOfRange { plane, shape });
        }

        let mut current = self.plane.write();
        if *current == plane {
            return Ok(false);
        }
        self.cache.reset(plane.z, plane.stokes, 0);
        *current = plane;
        Ok(true)
    }

    /// Tile at `key` on the current plane.
    pub fn tile(&self, key: TileKey) -> Result<(Plane, Tile), SessionError> {
        let plane = self.plane.read();
        let shape = self.shape();

        if !self.cache.layout().is_aligned(key) {
            return Err(SessionError::UnalignedTile(key));
        }
        if !shape.contains_pixel(key.x as i64, key.y as i64) {
            return Err(SessionError::TileOutOfBounds { key, shape });
        }

        self.cache
            .get(key, self.image.loader(), self.image.io_lock())
            .map(|tile| (*plane, tile))
            .ok_or(SessionError::TileUnavailable(key))
    }

    /// Pixel value at (`x`, `y`) on the current plane.
    ///
    /// Served from a cached tile when possible, loading the chunk otherwise.
    pub fn cursor_value(&self, x: i32, y: i32) -> Result<(Plane, f32), SessionError> {
        let plane = self.plane.read();
        let shape = self.shape();

        if !shape.contains_pixel(x as i64, y as i64) {
            return Err(SessionError::CursorOutOfBounds { x, y, shape });
        }

        let key = self.cache.layout().tile_key_for_pixel(x, y);
        let tile = self
            .cache
            .peek(key)
            .or_else(|| self.cache.get(key, self.image.loader(), self.image.io_lock()))
            .ok_or(SessionError::TileUnavailable(key))?;

        let value = tile
            .value((x - key.x) as usize, (y - key.y) as usize)
            .unwrap_or(f32::NAN);
        Ok((*plane, value))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("file_id", &self.file_id)
            .field("image", &self.image.name())
            .field("plane", &self.plane())
            .finish()
    }
}
