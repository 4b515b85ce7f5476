//! Event header shared by every message.

use bytes::{Buf, BufMut, BytesMut};

use super::ProtocolError;

/// Encoded size of [`EventHeader`].
pub const HEADER_LEN: usize = 8;

/// Interface version written into outgoing headers.
pub const ICD_VERSION: u16 = 1;

/// Message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventType {
    // client to server
    OpenFile = 1,
    CloseFile = 2,
    SetImageChannels = 3,
    AddRequiredTiles = 4,
    SetCursor = 5,
    StartAnimation = 6,
    StopAnimation = 7,
    AnimationFlowControl = 8,
    MomentRequest = 9,
    StopMomentCalc = 10,

    // server to client
    RasterTileData = 100,
    RasterTileSync = 101,
    CursorValue = 102,
    MomentProgress = 103,
    MomentResponse = 104,
    OpenFileAck = 105,
    ErrorData = 106,
}

impl EventType {
    /// Parse a wire tag.
    pub fn from_u16(value: u16) -> Option<Self> {
        let event = match value {
            1 => Self::OpenFile,
            2 => Self::CloseFile,
            3 => Self::SetImageChannels,
            4 => Self::AddRequiredTiles,
            5 => Self::SetCursor,
            6 => Self::StartAnimation,
            7 => Self::StopAnimation,
            8 => Self::AnimationFlowControl,
            9 => Self::MomentRequest,
            10 => Self::StopMomentCalc,
            100 => Self::RasterTileData,
            101 => Self::RasterTileSync,
            102 => Self::CursorValue,
            103 => Self::MomentProgress,
            104 => Self::MomentResponse,
            105 => Self::OpenFileAck,
            106 => Self::ErrorData,
            _ => return None,
        };
        Some(event)
    }

    /// Wire tag.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether clients send this event.
    pub fn is_inbound(self) -> bool {
        self.as_u16() < 100
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Fixed 8-byte prefix of every message: type, interface version and the
/// client-chosen request id echoed in responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// Raw type tag, possibly unknown
    pub event_type: u16,
    pub icd_version: u16,
    pub request_id: u32,
}

impl EventHeader {
    /// Header for an outgoing event.
    pub fn new(event_type: EventType, request_id: u32) -> Self {
        Self {
            event_type: event_type.as_u16(),
            icd_version: ICD_VERSION,
            request_id,
        }
    }

    /// Read a header from the front of `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < HEADER_LEN {
            return Err(ProtocolError::ShortHeader(buf.remaining()));
        }
        Ok(Self {
            event_type: buf.get_u16_le(),
            icd_version: buf.get_u16_le(),
            request_id: buf.get_u32_le(),
        })
    }

    /// Append the header to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.event_type);
        buf.put_u16_le(self.icd_version);
        buf.put_u32_le(self.request_id);
    }

    /// The known event type, if any.
    pub fn event(&self) -> Result<EventType, ProtocolError> {
        EventType::from_u16(self.event_type).ok_or(ProtocolError::UnknownEvent(self.event_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut buf = BytesMut::new();
        EventHeader::new(EventType::SetCursor, 0x0102_0304).encode(&mut buf);

        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[..], &[5, 0, 1, 0, 4, 3, 2, 1]);
    }

    #[test]
    fn test_decode_header() {
        let mut bytes: &[u8] = &[100, 0, 1, 0, 7, 0, 0, 0, 0xff];
        let header = EventHeader::decode(&mut bytes).unwrap();

        assert_eq!(header.event().unwrap(), EventType::RasterTileData);
        assert_eq!(header.request_id, 7);
        assert_eq!(bytes.len(), 1);
    }

    #[test]
    fn test_short_header() {
        let mut bytes: &[u8] = &[1, 0, 1];
        assert!(matches!(
            EventHeader::decode(&mut bytes),
            Err(ProtocolError::ShortHeader(3))
        ));
    }

    #[test]
    fn test_unknown_event() {
        let header = EventHeader {
            event_type: 42,
            icd_version: 1,
            request_id: 0,
        };
        assert!(matches!(header.event(), Err(ProtocolError::UnknownEvent(42))));
        assert_eq!(EventType::from_u16(42), None);
    }

    #[test]
    fn test_direction() {
        assert!(EventType::StopMomentCalc.is_inbound());
        assert!(!EventType::ErrorData.is_inbound());
    }
}
