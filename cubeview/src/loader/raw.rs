//! Headerless raw cube files.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use tracing::debug;

use super::{ChunkExtent, ChunkLoader, ChunkRequest, ImageShape, LoaderError};

const PIXEL_BYTES: usize = std::mem::size_of::<f32>();

/// Image cube stored as little-endian `f32` values with no header.
///
/// The layout matches [`super::MemoryCube`]: plane after plane, channels
/// varying fastest, each plane row-major. Dimensions are supplied by the
/// caller and checked against the file length on open.
#[derive(Debug)]
pub struct RawCubeFile {
    path: PathBuf,
    shape: ImageShape,
    file: Mutex<File>,
}

impl RawCubeFile {
    /// Open a raw cube file with the given dimensions.
    pub fn open(path: impl AsRef<Path>, shape: ImageShape) -> Result<Self, LoaderError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let actual = file.metadata()?.len() as usize;
        let expected = shape.len() * PIXEL_BYTES;
        if actual != expected {
            return Err(LoaderError::SizeMismatch { expected, actual });
        }

        debug!(path = %path.display(), shape = %shape, "Opened raw cube");
        Ok(Self {
            path,
            shape,
            file: Mutex::new(file),
        })
    }

    /// Write a cube to disk in the format read by [`RawCubeFile::open`].
    pub fn write(path: impl AsRef<Path>, values: &[f32]) -> Result<(), LoaderError> {
        let mut bytes = BytesMut::with_capacity(values.len() * PIXEL_BYTES);
        for value in values {
            bytes.put_f32_le(*value);
        }
        std::fs::write(path, &bytes)?;
        Ok(())
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkLoader for RawCubeFile {
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
        let base = self.shape.plane_offset(request.plane);
        let (x0, y0) = (request.min_x as usize, request.min_y as usize);
        let mut row_bytes = vec![0u8; extent.width * PIXEL_BYTES];

        buffer.clear();
        buffer.reserve(extent.len());

        let _io = io_lock.lock();
        let mut file = self.file.lock();
        for row in 0..extent.height {
            let pixel = base + (y0 + row) * self.shape.width + x0;
            file.seek(SeekFrom::Start((pixel * PIXEL_BYTES) as u64))?;
            file.read_exact(&mut row_bytes)?;
            let mut row = row_bytes.as_slice();
            buffer.extend((0..extent.width).map(|_| row.get_f32_le()));
        }

        Ok(extent)
    }
}
