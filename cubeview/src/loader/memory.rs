//! In-memory image cube.

use parking_lot::Mutex;

use super::{ChunkExtent, ChunkLoader, ChunkRequest, ImageShape, LoaderError};
use crate::cache::Plane;

/// Image cube held entirely in memory.
///
/// Pixels are stored plane after plane (channels varying fastest, then
/// polarizations), each plane row-major. Used for synthetic images and for
/// the outputs of calculations.
#[derive(Debug, Clone)]
pub struct MemoryCube {
    shape: ImageShape,
    data: Vec<f32>,
}

impl MemoryCube {
    /// Wrap existing pixel data.
    pub fn new(shape: ImageShape, data: Vec<f32>) -> Result<Self, LoaderError> {
        if data.len() != shape.len() {
            return Err(LoaderError::SizeMismatch {
                expected: shape.len(),
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Build a cube by evaluating `f(x, y, z, stokes)` for every pixel.
    pub fn from_fn<F>(shape: ImageShape, mut f: F) -> Self
    where
        F: FnMut(usize, usize, usize, usize) -> f32,
    {
        let mut data = Vec::with_capacity(shape.len());
        for stokes in 0..shape.stokes {
            for z in 0..shape.depth {
                for y in 0..shape.height {
                    for x in 0..shape.width {
                        data.push(f(x, y, z, stokes));
                    }
                }
            }
        }
        Self { shape, data }
    }

    /// A cube with every pixel set to `value`.
    pub fn filled(shape: ImageShape, value: f32) -> Self {
        Self {
            shape,
            data: vec![value; shape.len()],
        }
    }

    /// Pixels of one plane, or `None` if it does not exist.
    pub fn plane(&self, plane: Plane) -> Option<&[f32]> {
        if !self.shape.contains_plane(plane) {
            return None;
        }
        let start = self.shape.plane_offset(plane);
        self.data.get(start..start + self.shape.plane_len())
    }

    /// Value of a single pixel.
    pub fn value(&self, x: usize, y: usize, plane: Plane) -> Option<f32> {
        if x >= self.shape.width || y >= self.shape.height {
            return None;
        }
        self.plane(plane)
            .and_then(|pixels| pixels.get(y * self.shape.width + x))
            .copied()
    }
}

impl ChunkLoader for MemoryCube {
    fn shape(&self) -> ImageShape {
        self.shape
    }

    fn get_chunk(
        &self,
        request: &ChunkRequest,
        buffer: &mut Vec<f32>,
        io_lock: &Mutex<()>,
    ) -> Result<ChunkExtent, LoaderError> {
        let extent = request.clip(&self.shape)?;
        let width = self.shape.width;
        let base = self.shape.plane_offset(request.plane);
        let (x0, y0) = (request.min_x as usize, request.min_y as usize);

        buffer.clear();
        buffer.reserve(extent.len());

        let _io = io_lock.lock();
        for row in 0..extent.height {
            let start = base + (y0 + row) * width + x0;
            buffer.extend_from_slice(&self.data[start..start + extent.width]);
        }

        Ok(extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: ImageShape) -> MemoryCube {
        MemoryCube::from_fn(shape, |x, y, z, s| {
            (s * 1_000_000 + z * 10_000 + y * 100 + x) as f32
        })
    }

    #[test]
    fn test_new_checks_length() {
        let shape = ImageShape::new(2, 2, 1, 1);
        assert!(MemoryCube::new(shape, vec![0.0; 4]).is_ok());
        assert!(matches!(
            MemoryCube::new(shape, vec![0.0; 3]),
            Err(LoaderError::SizeMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_value_lookup() {
        let cube = ramp(ImageShape::new(10, 10, 3, 2));
        assert_eq!(cube.value(4, 7, Plane::new(2, 1)), Some(1_020_704.0));
        assert_eq!(cube.value(10, 0, Plane::default()), None);
        assert_eq!(cube.value(0, 0, Plane::new(3, 0)), None);
    }

    #[test]
    fn test_get_chunk_clips_to_image() {
        let cube = ramp(ImageShape::new(40, 30, 2, 1));
        let lock = Mutex::new(());
        let mut buffer = Vec::new();

        let request = ChunkRequest::new(32, 16, 32, Plane::new(1, 0));
        let extent = cube.get_chunk(&request, &mut buffer, &lock).unwrap();

        assert_eq!(extent, ChunkExtent::new(8, 14));
        assert_eq!(buffer.len(), 8 * 14);
        assert_eq!(buffer[0], 10_000.0 + 16.0 * 100.0 + 32.0);
        assert_eq!(buffer[8], 10_000.0 + 17.0 * 100.0 + 32.0);
    }

    #[test]
    fn test_get_chunk_rejects_bad_plane() {
        let cube = MemoryCube::filled(ImageShape::new(4, 4, 1, 1), 1.0);
        let lock = Mutex::new(());
        let mut buffer = Vec::new();

        let request = ChunkRequest::new(0, 0, 512, Plane::new(0, 1));
        assert!(cube.get_chunk(&request, &mut buffer, &lock).is_err());
    }
}
