//! Mean over a channel range, computed chunk by chunk.

use tokio_util::sync::CancellationToken;

use crate::cache::{Plane, TileLayout};
use crate::loader::{ChunkRequest, ImageShape, MemoryCube, OpenImage};

use super::SessionError;

/// Per-pixel mean of channels `first..=last` of one polarization.
///
/// Non-finite values are skipped; pixels with no finite value come out as
/// NaN. Cancellation is checked after every channel and yields `Ok(None)`.
/// `progress` receives the completed fraction after each channel.
pub fn compute_mean(
    image: &OpenImage,
    first: i32,
    last: i32,
    stokes: i32,
    layout: TileLayout,
    cancel: &CancellationToken,
    mut progress: impl FnMut(f32),
) -> Result<Option<MemoryCube>, SessionError> {
    let shape = image.shape();
    if first > last {
        return Err(SessionError::InvalidChannelRange { first, last });
    }
    for plane in [Plane::new(first, stokes), Plane::new(last, stokes)] {
        if !shape.contains_plane(plane) {
            return Err(SessionError::PlaneOutOfRange { plane, shape });
        }
    }

    let chunk = layout.chunk_size();
    let mut sums = vec![0f64; shape.plane_len()];
    let mut counts = vec![0u32; shape.plane_len()];
    let mut buffer = Vec::new();
    let total = (last - first + 1) as f32;

    for (done, z) in (first..=last).enumerate() {
        for min_y in (0..shape.height).step_by(chunk as usize) {
            for min_x in (0..shape.width).step_by(chunk as usize) {
                let request =
                    ChunkRequest::new(min_x as i32, min_y as i32, chunk, Plane::new(z, stokes));
                let extent = image
                    .loader()
                    .get_chunk(&request, &mut buffer, image.io_lock())?;

                for row in 0..extent.height {
                    let src = &buffer[row * extent.width..(row + 1) * extent.width];
                    let dst = (min_y + row) * shape.width + min_x;
                    for (col, value) in src.iter().enumerate() {
                        if value.is_finite() {
                            sums[dst + col] += *value as f64;
                            counts[dst + col] += 1;
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Ok(None);
        }
        progress((done + 1) as f32 / total);
    }

    let means = sums
        .iter()
        .zip(&counts)
        .map(|(sum, count)| {
            if *count == 0 {
                f32::NAN
            } else {
                (*sum / *count as f64) as f32
            }
        })
        .collect();

    let output = ImageShape::new(shape.width, shape.height, 1, 1);
    Ok(Some(MemoryCube::new(output, means)?))
}
