//! Tile payload compression.
//!
//! Compressed tiles travel as an LZ4 block of little-endian `f32` values
//! plus a run-length list of NaN positions. Before compression each NaN is
//! replaced by the mean of the valid pixels in its 4x4 block, which keeps
//! the block smooth; the client restores the NaNs from the run list.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};

use super::ProtocolError;

/// Side of the square blocks whose NaNs are filled with the block mean.
const FILL_BLOCK: usize = 4;

/// How tile pixels are encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TileCompression {
    /// Raw little-endian `f32` values
    None,
    #[default]
    Lz4,
}

impl TileCompression {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Lz4),
            other => Err(ProtocolError::UnknownCompression(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Lz4 => "lz4",
        }
    }
}

impl fmt::Display for TileCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TileCompression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "lz4" => Ok(Self::Lz4),
            other => Err(format!("unknown tile compression '{}' (expected none or lz4)", other)),
        }
    }
}

/// Run lengths of alternating valid and NaN pixels, starting with a valid
/// run (which may be empty).
///
/// Tiles containing both valid pixels and NaNs get the NaNs of every mixed
/// 4x4 block replaced by that block's mean. All-NaN blocks are left as they
/// are.
pub fn nan_encodings_block(values: &mut [f32], width: usize, height: usize) -> Vec<i32> {
    let len = (width * height).min(values.len());
    let mut encodings = Vec::new();
    let mut run_start = 0;
    let mut in_nan = false;

    for (i, value) in values[..len].iter().enumerate() {
        if value.is_nan() != in_nan {
            encodings.push((i - run_start) as i32);
            run_start = i;
            in_nan = !in_nan;
        }
    }
    encodings.push((len - run_start) as i32);

    if encodings.len() > 1 {
        fill_mixed_blocks(&mut values[..len], width, height);
    }
    encodings
}

fn fill_mixed_blocks(values: &mut [f32], width: usize, height: usize) {
    for by in (0..height).step_by(FILL_BLOCK) {
        for bx in (0..width).step_by(FILL_BLOCK) {
            let block_width = FILL_BLOCK.min(width - bx);
            let block_height = FILL_BLOCK.min(height - by);
            let index = |col: usize, row: usize| (by + row) * width + bx + col;

            let mut sum = 0.0f32;
            let mut valid = 0usize;
            for row in 0..block_height {
                for col in 0..block_width {
                    let v = values[index(col, row)];
                    if !v.is_nan() {
                        sum += v;
                        valid += 1;
                    }
                }
            }

            if valid == 0 || valid == block_width * block_height {
                continue;
            }
            let mean = sum / valid as f32;
            for row in 0..block_height {
                for col in 0..block_width {
                    let v = &mut values[index(col, row)];
                    if v.is_nan() {
                        *v = mean;
                    }
                }
            }
        }
    }
}

/// Put NaNs back where `encodings` says they were.
pub fn restore_nans(values: &mut [f32], encodings: &[i32]) -> Result<(), ProtocolError> {
    if encodings.is_empty() {
        return Ok(());
    }

    let mut pos = 0usize;
    for (i, run) in encodings.iter().enumerate() {
        let end = usize::try_from(*run)
            .ok()
            .and_then(|run| pos.checked_add(run))
            .filter(|end| *end <= values.len())
            .ok_or(ProtocolError::InvalidNanEncoding {
                runs: encodings.len(),
                pixels: values.len(),
            })?;
        if i % 2 == 1 {
            values[pos..end].fill(f32::NAN);
        }
        pos = end;
    }

    if pos != values.len() {
        return Err(ProtocolError::InvalidNanEncoding {
            runs: encodings.len(),
            pixels: values.len(),
        });
    }
    Ok(())
}

/// LZ4 block of the values as little-endian bytes, size-prefixed.
pub fn compress(values: &[f32]) -> Vec<u8> {
    let mut raw = BytesMut::with_capacity(values.len() * 4);
    for value in values {
        raw.put_f32_le(*value);
    }
    lz4_flex::compress_prepend_size(&raw)
}

/// Inverse of [`compress`]; the block must hold exactly `count` values.
pub fn decompress(data: &[u8], count: usize) -> Result<Vec<f32>, ProtocolError> {
    let raw = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| ProtocolError::Decompress(e.to_string()))?;
    if raw.len() != count * 4 {
        return Err(ProtocolError::Decompress(format!(
            "expected {} bytes, got {}",
            count * 4,
            raw.len()
        )));
    }

    let mut buf = raw.as_slice();
    Ok((0..count).map(|_| buf.get_f32_le()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same_bits(a: &[f32], b: &[f32]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
    }

    #[test]
    fn test_nan_free_tile_is_one_run() {
        let mut values = vec![1.0; 12];
        assert_eq!(nan_encodings_block(&mut values, 4, 3), vec![12]);
        assert!(values.iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_runs_alternate_starting_with_valid() {
        let nan = f32::NAN;
        let mut values = vec![nan, nan, 1.0, 2.0, nan, 3.0];
        let encodings = nan_encodings_block(&mut values, 6, 1);
        assert_eq!(encodings, vec![0, 2, 2, 1, 1]);
    }

    #[test]
    fn test_mixed_block_filled_with_mean() {
        let nan = f32::NAN;
        // 4x4 block with two valid pixels, then an all-NaN 1x4 column
        #[rustfmt::skip]
        let mut values = vec![
            2.0, nan, nan, nan, nan,
            nan, nan, nan, nan, nan,
            nan, nan, nan, 4.0, nan,
            nan, nan, nan, nan, nan,
        ];
        nan_encodings_block(&mut values, 5, 4);

        for row in 0..4 {
            for col in 0..4 {
                assert_eq!(values[row * 5 + col], 3.0, "({col}, {row})");
            }
            assert!(values[row * 5 + 4].is_nan());
        }
    }

    #[test]
    fn test_all_nan_tile_left_alone() {
        let mut values = vec![f32::NAN; 8];
        assert_eq!(nan_encodings_block(&mut values, 4, 2), vec![0, 8]);
        assert!(values.iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_restore_after_compression() {
        let nan = f32::NAN;
        let original: Vec<f32> = (0..64)
            .map(|i| if i % 7 == 3 || (20..26).contains(&i) { nan } else { i as f32 * 0.5 })
            .collect();

        let mut filled = original.clone();
        let encodings = nan_encodings_block(&mut filled, 8, 8);
        assert!(filled.iter().all(|v| !v.is_nan()));

        let packed = compress(&filled);
        let mut restored = decompress(&packed, 64).unwrap();
        restore_nans(&mut restored, &encodings).unwrap();
        assert!(same_bits(&restored, &original));
    }

    #[test]
    fn test_restore_rejects_bad_runs() {
        let mut values = vec![0.0; 4];
        assert!(restore_nans(&mut values, &[2, 3]).is_err());
        assert!(restore_nans(&mut values, &[1, 1]).is_err());
        assert!(restore_nans(&mut values, &[-1, 5]).is_err());
        assert!(restore_nans(&mut values, &[1, 2, 1]).is_ok());
        assert!(values[1].is_nan() && values[2].is_nan());
    }

    #[test]
    fn test_decompress_checks_length() {
        let packed = compress(&[1.0, 2.0]);
        assert!(decompress(&packed, 3).is_err());
        assert!(decompress(&[1, 2, 3], 1).is_err());
    }

    #[test]
    fn test_compression_names() {
        assert_eq!("LZ4".parse::<TileCompression>(), Ok(TileCompression::Lz4));
        assert_eq!("none".parse::<TileCompression>(), Ok(TileCompression::None));
        assert!("zfp".parse::<TileCompression>().is_err());
        assert_eq!(TileCompression::from_u8(1).unwrap(), TileCompression::Lz4);
        assert!(TileCompression::from_u8(7).is_err());
    }
}
