//! Client requests.

use bytes::{BufMut, Bytes, BytesMut};

use super::header::{EventHeader, EventType};
use super::wire::{put_plane, put_string, put_tile_keys, Reader};
use super::ProtocolError;
use crate::cache::{Plane, TileKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFile {
    pub file_id: i32,
    /// Name of a registered image
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetImageChannels {
    pub file_id: i32,
    pub plane: Plane,
    /// Tiles to stream once the plane is set
    pub required_tiles: Vec<TileKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddRequiredTiles {
    pub file_id: i32,
    pub tiles: Vec<TileKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetCursor {
    pub file_id: i32,
    pub x: i32,
    pub y: i32,
}

/// Start playing through a range of planes.
///
/// A negative `delta` plays backwards from `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAnimation {
    pub file_id: i32,
    pub first: Plane,
    pub last: Plane,
    pub start: Plane,
    pub delta: Plane,
    /// Frames per second
    pub frame_rate: i32,
    pub looping: bool,
    pub reverse_at_end: bool,
    pub required_tiles: Vec<TileKey>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopAnimation {
    pub file_id: i32,
    pub end_frame: Plane,
}

/// Acknowledgement of the last animation frame the client rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationFlowControl {
    pub file_id: i32,
    pub received_frame: Plane,
}

/// Compute the mean over a channel range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MomentRequest {
    pub file_id: i32,
    pub first_channel: i32,
    pub last_channel: i32,
    pub stokes: i32,
}

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    OpenFile(OpenFile),
    /// File id `-1` closes every file
    CloseFile { file_id: i32 },
    SetImageChannels(SetImageChannels),
    AddRequiredTiles(AddRequiredTiles),
    SetCursor(SetCursor),
    StartAnimation(StartAnimation),
    StopAnimation(StopAnimation),
    AnimationFlowControl(AnimationFlowControl),
    MomentRequest(MomentRequest),
    StopMomentCalc { file_id: i32 },
}

impl InboundMessage {
    /// Decode the payload of a message of type `event`.
    pub fn decode(event: EventType, payload: Bytes) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);

        let message = match event {
            EventType::OpenFile => Self::OpenFile(OpenFile {
                file_id: r.i32("file_id")?,
                name: r.string("name")?,
            }),
            EventType::CloseFile => Self::CloseFile {
                file_id: r.i32("file_id")?,
            },
            EventType::SetImageChannels => Self::SetImageChannels(SetImageChannels {
                file_id: r.i32("file_id")?,
                plane: r.plane()?,
                required_tiles: r.tile_keys()?,
            }),
            EventType::AddRequiredTiles => Self::AddRequiredTiles(AddRequiredTiles {
                file_id: r.i32("file_id")?,
                tiles: r.tile_keys()?,
            }),
            EventType::SetCursor => Self::SetCursor(SetCursor {
                file_id: r.i32("file_id")?,
                x: r.i32("x")?,
                y: r.i32("y")?,
            }),
            EventType::StartAnimation => Self::StartAnimation(StartAnimation {
                file_id: r.i32("file_id")?,
                first: r.plane()?,
                last: r.plane()?,
                start: r.plane()?,
                delta: r.plane()?,
                frame_rate: r.i32("frame_rate")?,
                looping: r.bool("looping")?,
                reverse_at_end: r.bool("reverse_at_end")?,
                required_tiles: r.tile_keys()?,
            }),
            EventType::StopAnimation => Self::StopAnimation(StopAnimation {
                file_id: r.i32("file_id")?,
                end_frame: r.plane()?,
            }),
            EventType::AnimationFlowControl => {
                Self::AnimationFlowControl(AnimationFlowControl {
                    file_id: r.i32("file_id")?,
                    received_frame: r.plane()?,
                })
            }
            EventType::MomentRequest => Self::MomentRequest(MomentRequest {
                file_id: r.i32("file_id")?,
                first_channel: r.i32("first_channel")?,
                last_channel: r.i32("last_channel")?,
                stokes: r.i32("stokes")?,
            }),
            EventType::StopMomentCalc => Self::StopMomentCalc {
                file_id: r.i32("file_id")?,
            },
            other => return Err(ProtocolError::UnexpectedEvent(other)),
        };

        r.finish()?;
        Ok(message)
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::OpenFile(_) => EventType::OpenFile,
            Self::CloseFile { .. } => EventType::CloseFile,
            Self::SetImageChannels(_) => EventType::SetImageChannels,
            Self::AddRequiredTiles(_) => EventType::AddRequiredTiles,
            Self::SetCursor(_) => EventType::SetCursor,
            Self::StartAnimation(_) => EventType::StartAnimation,
            Self::StopAnimation(_) => EventType::StopAnimation,
            Self::AnimationFlowControl(_) => EventType::AnimationFlowControl,
            Self::MomentRequest(_) => EventType::MomentRequest,
            Self::StopMomentCalc { .. } => EventType::StopMomentCalc,
        }
    }

    /// File the request refers to.
    pub fn file_id(&self) -> i32 {
        match self {
            Self::OpenFile(m) => m.file_id,
            Self::CloseFile { file_id } | Self::StopMomentCalc { file_id } => *file_id,
            Self::SetImageChannels(m) => m.file_id,
            Self::AddRequiredTiles(m) => m.file_id,
            Self::SetCursor(m) => m.file_id,
            Self::StartAnimation(m) => m.file_id,
            Self::StopAnimation(m) => m.file_id,
            Self::AnimationFlowControl(m) => m.file_id,
            Self::MomentRequest(m) => m.file_id,
        }
    }

    /// Encode header and payload into one frame, as a client would send it.
    pub fn encode(&self, request_id: u32) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        EventHeader::new(self.event_type(), request_id).encode(&mut buf);

        match self {
            Self::OpenFile(m) => {
                buf.put_i32_le(m.file_id);
                put_string(&mut buf, &m.name);
            }
            Self::CloseFile { file_id } | Self::StopMomentCalc { file_id } => {
                buf.put_i32_le(*file_id);
            }
            Self::SetImageChannels(m) => {
                buf.put_i32_le(m.file_id);
                put_plane(&mut buf, m.plane);
                put_tile_keys(&mut buf, &m.required_tiles);
            }
            Self::AddRequiredTiles(m) => {
                buf.put_i32_le(m.file_id);
                put_tile_keys(&mut buf, &m.tiles);
            }
            Self::SetCursor(m) => {
                buf.put_i32_le(m.file_id);
                buf.put_i32_le(m.x);
                buf.put_i32_le(m.y);
            }
            Self::StartAnimation(m) => {
                buf.put_i32_le(m.file_id);
                for plane in [m.first, m.last, m.start, m.delta] {
                    put_plane(&mut buf, plane);
                }
                buf.put_i32_le(m.frame_rate);
                buf.put_u8(m.looping as u8);
                buf.put_u8(m.reverse_at_end as u8);
                put_tile_keys(&mut buf, &m.required_tiles);
            }
            Self::StopAnimation(m) => {
                buf.put_i32_le(m.file_id);
                put_plane(&mut buf, m.end_frame);
            }
            Self::AnimationFlowControl(m) => {
                buf.put_i32_le(m.file_id);
                put_plane(&mut buf, m.received_frame);
            }
            Self::MomentRequest(m) => {
                buf.put_i32_le(m.file_id);
                buf.put_i32_le(m.first_channel);
                buf.put_i32_le(m.last_channel);
                buf.put_i32_le(m.stokes);
            }
        }

        buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_request;

    #[test]
    fn test_set_image_channels_layout() {
        let message = InboundMessage::SetImageChannels(SetImageChannels {
            file_id: 3,
            plane: Plane::new(7, 1),
            required_tiles: vec![TileKey::new(0, 256), TileKey::new(512, 0)],
        });
        let frame = message.encode(11);

        // header + file id + plane + count + two keys
        assert_eq!(frame.len(), 8 + 4 + 8 + 4 + 16);
        let (header, decoded) = decode_request(frame).unwrap();
        assert_eq!(header.request_id, 11);
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_start_animation_decodes() {
        let message = InboundMessage::StartAnimation(StartAnimation {
            file_id: 0,
            first: Plane::new(0, 0),
            last: Plane::new(9, 0),
            start: Plane::new(9, 0),
            delta: Plane::new(-1, 0),
            frame_rate: 5,
            looping: true,
            reverse_at_end: false,
            required_tiles: vec![TileKey::new(0, 0)],
        });
        let (_, decoded) = decode_request(message.encode(1)).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.file_id(), 0);
    }

    #[test]
    fn test_truncated_payload() {
        let mut frame = BytesMut::new();
        EventHeader::new(EventType::SetCursor, 1).encode(&mut frame);
        frame.put_i32_le(0);
        frame.put_i32_le(10);

        assert!(matches!(
            decode_request(frame.freeze()),
            Err(ProtocolError::Truncated { field: "y", .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = BytesMut::new();
        EventHeader::new(EventType::CloseFile, 1).encode(&mut frame);
        frame.put_i32_le(-1);
        frame.put_u8(0);

        assert!(matches!(
            decode_request(frame.freeze()),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_tile_count_larger_than_payload() {
        let mut frame = BytesMut::new();
        EventHeader::new(EventType::AddRequiredTiles, 1).encode(&mut frame);
        frame.put_i32_le(0);
        frame.put_u32_le(u32::MAX);

        assert!(matches!(
            decode_request(frame.freeze()),
            Err(ProtocolError::Truncated { field: "tiles", .. })
        ));
    }

    #[test]
    fn test_outbound_type_rejected() {
        let mut frame = BytesMut::new();
        EventHeader::new(EventType::RasterTileData, 1).encode(&mut frame);
        assert!(matches!(
            decode_request(frame.freeze()),
            Err(ProtocolError::UnexpectedEvent(EventType::RasterTileData))
        ));
    }
}
