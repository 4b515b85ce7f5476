//! Server responses and stream events.

use bytes::{BufMut, Bytes, BytesMut};

use super::compression::{compress, decompress, nan_encodings_block, restore_nans, TileCompression};
use super::header::{EventHeader, EventType};
use super::wire::{put_plane, put_string, Reader};
use super::ProtocolError;
use crate::cache::{Plane, Tile, TileKey};
use crate::loader::ImageShape;

/// Pixel payload of a tile message.
///
/// Uncompressed tiles leaving the server hold their pooled buffer until
/// encoded; decoded ones own a plain vector.
#[derive(Debug, Clone)]
pub enum TilePixels {
    Pooled(Tile),
    Owned(Vec<f32>),
    /// LZ4 block with NaNs filled in
    Compressed(Bytes),
}

impl TilePixels {
    /// Raw values, if the payload is not compressed.
    pub fn raw(&self) -> Option<&[f32]> {
        match self {
            Self::Pooled(tile) => Some(tile.data()),
            Self::Owned(values) => Some(values),
            Self::Compressed(_) => None,
        }
    }

    pub fn compression(&self) -> TileCompression {
        match self {
            Self::Compressed(_) => TileCompression::Lz4,
            _ => TileCompression::None,
        }
    }
}

impl PartialEq for TilePixels {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Compressed(a), Self::Compressed(b)) => a == b,
            _ => match (self.raw(), other.raw()) {
                (Some(a), Some(b)) => {
                    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
                }
                _ => false,
            },
        }
    }
}

/// One tile of one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterTile {
    pub file_id: i32,
    pub plane: Plane,
    pub key: TileKey,
    pub width: u32,
    pub height: u32,
    /// Alternating valid/NaN run lengths; empty when uncompressed
    pub nan_encodings: Vec<i32>,
    pub pixels: TilePixels,
}

impl RasterTile {
    /// Prepare a cached tile for sending.
    ///
    /// Compression copies the pixels out, so the pooled buffer is released
    /// as soon as the tile is dropped.
    pub fn from_tile(
        file_id: i32,
        plane: Plane,
        key: TileKey,
        tile: Tile,
        compression: TileCompression,
    ) -> Self {
        let (width, height) = (tile.width(), tile.height());
        let (nan_encodings, pixels) = match compression {
            TileCompression::None => (Vec::new(), TilePixels::Pooled(tile)),
            TileCompression::Lz4 => {
                let mut values = tile.data().to_vec();
                let encodings = nan_encodings_block(&mut values, width, height);
                (encodings, TilePixels::Compressed(Bytes::from(compress(&values))))
            }
        };

        Self {
            file_id,
            plane,
            key,
            width: width as u32,
            height: height as u32,
            nan_encodings,
            pixels,
        }
    }

    pub fn compression(&self) -> TileCompression {
        self.pixels.compression()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Pixel values with NaNs in place, decompressing if needed.
    pub fn values(&self) -> Result<Vec<f32>, ProtocolError> {
        match &self.pixels {
            TilePixels::Compressed(block) => {
                let mut values = decompress(block, self.pixel_count())?;
                restore_nans(&mut values, &self.nan_encodings)?;
                Ok(values)
            }
            raw => Ok(raw.raw().map(<[f32]>::to_vec).unwrap_or_default()),
        }
    }
}

/// An event sent to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    OpenFileAck {
        file_id: i32,
        success: bool,
        message: String,
        shape: Option<ImageShape>,
    },
    RasterTileData(RasterTile),
    /// Brackets a batch of tiles; `end_sync` marks the closing message
    RasterTileSync {
        file_id: i32,
        plane: Plane,
        end_sync: bool,
    },
    /// Pixel value under the cursor, NaN when unavailable
    CursorValue {
        file_id: i32,
        plane: Plane,
        x: i32,
        y: i32,
        value: f32,
    },
    /// Fraction of a calculation completed (0.0 to 1.0)
    MomentProgress { file_id: i32, progress: f32 },
    MomentResponse {
        file_id: i32,
        success: bool,
        cancelled: bool,
        message: String,
        output_name: String,
    },
    ErrorData {
        /// Tag of the request that failed, 0 if unknown
        event_type: u16,
        message: String,
    },
}

impl OutboundEvent {
    pub fn error(event_type: u16, message: impl Into<String>) -> Self {
        Self::ErrorData {
            event_type,
            message: message.into(),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::OpenFileAck { .. } => EventType::OpenFileAck,
            Self::RasterTileData(_) => EventType::RasterTileData,
            Self::RasterTileSync { .. } => EventType::RasterTileSync,
            Self::CursorValue { .. } => EventType::CursorValue,
            Self::MomentProgress { .. } => EventType::MomentProgress,
            Self::MomentResponse { .. } => EventType::MomentResponse,
            Self::ErrorData { .. } => EventType::ErrorData,
        }
    }

    /// Encode header and payload into one frame.
    pub fn encode(&self, request_id: u32) -> Bytes {
        let capacity = match self {
            Self::RasterTileData(tile) => match &tile.pixels {
                TilePixels::Compressed(block) => 64 + tile.nan_encodings.len() * 4 + block.len(),
                _ => 64 + tile.pixel_count() * 4,
            },
            _ => 64,
        };
        let mut buf = BytesMut::with_capacity(capacity);
        EventHeader::new(self.event_type(), request_id).encode(&mut buf);

        match self {
            Self::OpenFileAck {
                file_id,
                success,
                message,
                shape,
            } => {
                buf.put_i32_le(*file_id);
                buf.put_u8(*success as u8);
                put_string(&mut buf, message);
                let shape = shape.unwrap_or(ImageShape::new(0, 0, 0, 0));
                for dim in [shape.width, shape.height, shape.depth, shape.stokes] {
                    buf.put_u32_le(dim as u32);
                }
            }
            Self::RasterTileData(tile) => {
                buf.put_i32_le(tile.file_id);
                put_plane(&mut buf, tile.plane);
                buf.put_i32_le(tile.key.x);
                buf.put_i32_le(tile.key.y);
                buf.put_u32_le(tile.width);
                buf.put_u32_le(tile.height);
                buf.put_u8(tile.compression().as_u8());
                buf.put_u32_le(tile.nan_encodings.len() as u32);
                for run in &tile.nan_encodings {
                    buf.put_i32_le(*run);
                }
                match &tile.pixels {
                    TilePixels::Compressed(block) => {
                        buf.put_u32_le(block.len() as u32);
                        buf.put_slice(block);
                    }
                    raw => {
                        for value in raw.raw().unwrap_or_default() {
                            buf.put_f32_le(*value);
                        }
                    }
                }
            }
            Self::RasterTileSync {
                file_id,
                plane,
                end_sync,
            } => {
                buf.put_i32_le(*file_id);
                put_plane(&mut buf, *plane);
                buf.put_u8(*end_sync as u8);
            }
            Self::CursorValue {
                file_id,
                plane,
                x,
                y,
                value,
            } => {
                buf.put_i32_le(*file_id);
                put_plane(&mut buf, *plane);
                buf.put_i32_le(*x);
                buf.put_i32_le(*y);
                buf.put_f32_le(*value);
            }
            Self::MomentProgress { file_id, progress } => {
                buf.put_i32_le(*file_id);
                buf.put_f32_le(*progress);
            }
            Self::MomentResponse {
                file_id,
                success,
                cancelled,
                message,
                output_name,
            } => {
                buf.put_i32_le(*file_id);
                buf.put_u8(*success as u8);
                buf.put_u8(*cancelled as u8);
                put_string(&mut buf, message);
                put_string(&mut buf, output_name);
            }
            Self::ErrorData {
                event_type,
                message,
            } => {
                buf.put_u16_le(*event_type);
                put_string(&mut buf, message);
            }
        }

        buf.freeze()
    }

    /// Decode the payload of an event of type `event`, as a client would.
    pub fn decode(event: EventType, payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);

        let decoded = match event {
            EventType::OpenFileAck => {
                let file_id = r.i32("file_id")?;
                let success = r.bool("success")?;
                let message = r.string("message")?;
                let mut dims = [0usize; 4];
                for dim in dims.iter_mut() {
                    *dim = r.u32("shape")? as usize;
                }
                Self::OpenFileAck {
                    file_id,
                    success,
                    message,
                    shape: success.then(|| ImageShape::new(dims[0], dims[1], dims[2], dims[3])),
                }
            }
            EventType::RasterTileData => {
                let file_id = r.i32("file_id")?;
                let plane = r.plane()?;
                let key = TileKey::new(r.i32("x")?, r.i32("y")?);
                let width = r.u32("width")?;
                let height = r.u32("height")?;
                let compression = TileCompression::from_u8(r.u8("compression")?)?;
                let nan_encodings = r.i32_values("nan_encodings")?;
                let pixels = match compression {
                    TileCompression::None => {
                        TilePixels::Owned(r.f32_values(width as usize * height as usize)?)
                    }
                    TileCompression::Lz4 => TilePixels::Compressed(r.block("pixels")?),
                };
                Self::RasterTileData(RasterTile {
                    file_id,
                    plane,
                    key,
                    width,
                    height,
                    nan_encodings,
                    pixels,
                })
            }
            EventType::RasterTileSync => Self::RasterTileSync {
                file_id: r.i32("file_id")?,
                plane: r.plane()?,
                end_sync: r.bool("end_sync")?,
            },
            EventType::CursorValue => Self::CursorValue {
                file_id: r.i32("file_id")?,
                plane: r.plane()?,
                x: r.i32("x")?,
                y: r.i32("y")?,
                value: r.f32("value")?,
            },
            EventType::MomentProgress => Self::MomentProgress {
                file_id: r.i32("file_id")?,
                progress: r.f32("progress")?,
            },
            EventType::MomentResponse => Self::MomentResponse {
                file_id: r.i32("file_id")?,
                success: r.bool("success")?,
                cancelled: r.bool("cancelled")?,
                message: r.string("message")?,
                output_name: r.string("output_name")?,
            },
            EventType::ErrorData => Self::ErrorData {
                event_type: r.u16("event_type")?,
                message: r.string("message")?,
            },
            other => return Err(ProtocolError::UnexpectedEvent(other)),
        };

        r.finish()?;
        Ok(decoded)
    }
}
