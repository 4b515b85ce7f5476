//! Chunk loaders.
//!
//! A loader reads rectangular sub-regions of one plane of an image cube.
//! The tile cache asks for chunks aligned to the chunk grid; the loader
//! clips the request to the image and reports the extent it actually
//! filled.
//!
//! Loaders are shared between sessions through the [`ImageRegistry`]. Each
//! open image carries one I/O lock, and loaders hold it only around the
//! actual read.

mod memory;
mod raw;
mod registry;

pub use memory::MemoryCube;
pub use raw::RawCubeFile;
pub use registry::{ImageRegistry, OpenImage};

use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;

use crate::cache::Plane;

/// Dimensions of an image cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageShape {
    /// Pixels per row
    pub width: usize,
    /// Rows per plane
    pub height: usize,
    /// Number of channels
    pub depth: usize,
    /// Number of polarizations
    pub stokes: usize,
}

impl ImageShape {
    /// Create a new shape.
    pub const fn new(width: usize, height: usize, depth: usize, stokes: usize) -> Self {
        Self {
            width,
            height,
            depth,
            stokes,
        }
    }

    /// Number of pixels in one plane.
    pub fn plane_len(&self) -> usize {
        self.width * self.height
    }

    /// Total number of pixels in the cube.
    pub fn len(&self) -> usize {
        self.plane_len() * self.depth * self.stokes
    }

    /// Whether the cube holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `plane` addresses an existing channel and polarization.
    pub fn contains_plane(&self, plane: Plane) -> bool {
        plane.z >= 0
            && plane.stokes >= 0
            && (plane.z as usize) < self.depth
            && (plane.stokes as usize) < self.stokes
    }

    /// Whether the pixel lies inside a plane.
    pub fn contains_pixel(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    /// Offset of the first pixel of `plane` in a cube stored plane after
    /// plane, channels varying fastest.
    pub(crate) fn plane_offset(&self, plane: Plane) -> usize {
        (plane.stokes as usize * self.depth + plane.z as usize) * self.plane_len()
    }
}

impl fmt::Display for ImageShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.width, self.height, self.depth, self.stokes
        )
    }
}

/// A request for one chunk of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Column of the top-left pixel
    pub min_x: i32,
    /// Row of the top-left pixel
    pub min_y: i32,
    /// Side length of the requested square region
    pub size: i32,
    /// Plane to read from
    pub plane: Plane,
}

impl ChunkRequest {
    /// Create a request for a `size` x `size` region starting at
    /// (`min_x`, `min_y`).
    pub fn new(min_x: i32, min_y: i32, size: i32, plane: Plane) -> Self {
        Self {
            min_x,
            min_y,
            size,
            plane,
        }
    }

    /// Clip the request to the image, returning the extent that will be
    /// filled.
    pub fn clip(&self, shape: &ImageShape) -> Result<ChunkExtent, LoaderError> {
        if !shape.contains_plane(self.plane) {
            return Err(LoaderError::PlaneOutOfRange {
                plane: self.plane,
                shape: *shape,
            });
        }
        if self.size <= 0 || !shape.contains_pixel(self.min_x as i64, self.min_y as i64) {
            return Err(LoaderError::OutOfBounds {
                x: self.min_x,
                y: self.min_y,
                shape: *shape,
            });
        }

        let size = self.size as usize;
        Ok(ChunkExtent {
            width: size.min(shape.width - self.min_x as usize),
            height: size.min(shape.height - self.min_y as usize),
        })
    }
}

/// The region actually filled by a chunk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkExtent {
    /// Valid columns (row stride of the returned buffer)
    pub width: usize,
    /// Valid rows
    pub height: usize,
}

impl ChunkExtent {
    /// Create a new extent.
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered.
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    /// Whether no pixels are covered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors raised while reading image data.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Chunk origin ({x}, {y}) is outside image {shape}")]
    OutOfBounds { x: i32, y: i32, shape: ImageShape },

    #[error("Plane {plane} is outside image {shape}")]
    PlaneOutOfRange { plane: Plane, shape: ImageShape },

    #[error("Loader returned extent {width}x{height} for a chunk of size {size}")]
    InvalidExtent {
        width: usize,
        height: usize,
        size: usize,
    },

    #[error("Image data has {actual} values, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of image chunks.
pub trait ChunkLoader: Send + Sync {
    /// Dimensions of the image.
    fn shape(&self) -> ImageShape;

    /// Fill `buffer` with the requested chunk, row-major with a row stride
    /// equal to the returned extent width.
    ///
    /// `io_lock` serializes access to the underlying image and must be held
    /// only for the duration of the read.
    fn get_chunk(
        &self,
        request: &ChunkRequest,
        buffer: &mut Vec<f32>,
        io_lock: &Mutex<()>,
    ) -> Result<ChunkExtent, LoaderError>;
}
