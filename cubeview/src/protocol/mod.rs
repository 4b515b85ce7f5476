//! Binary message framing.
//!
//! Every message is an 8-byte [`EventHeader`] followed by a little-endian
//! payload whose layout depends on the event type. Frames themselves are
//! delimited by the transport (see [`crate::server`]).

mod compression;
mod header;
mod inbound;
mod outbound;
mod wire;

pub use compression::{
    compress, decompress, nan_encodings_block, restore_nans, TileCompression,
};
pub use header::{EventHeader, EventType, HEADER_LEN, ICD_VERSION};
pub use inbound::{
    AddRequiredTiles, AnimationFlowControl, InboundMessage, MomentRequest, OpenFile,
    SetCursor, SetImageChannels, StartAnimation, StopAnimation,
};
pub use outbound::{OutboundEvent, RasterTile, TilePixels};

use bytes::Bytes;
use thiserror::Error;

/// Errors decoding a message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Message shorter than header ({0} bytes)")]
    ShortHeader(usize),

    #[error("Unknown event type {0}")]
    UnknownEvent(u16),

    #[error("Event {0} is not valid in this direction")]
    UnexpectedEvent(EventType),

    #[error("Payload truncated reading {field}: needed {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("{0} unexpected bytes after payload")]
    TrailingBytes(usize),

    #[error("Unknown tile compression {0}")]
    UnknownCompression(u8),

    #[error("Tile decompression failed: {0}")]
    Decompress(String),

    #[error("NaN encoding of {runs} runs does not cover {pixels} pixels")]
    InvalidNanEncoding { runs: usize, pixels: usize },
}

/// Split a client frame into its header and decoded request.
pub fn decode_request(mut frame: Bytes) -> Result<(EventHeader, InboundMessage), ProtocolError> {
    let header = EventHeader::decode(&mut frame)?;
    let message = InboundMessage::decode(header.event()?, frame)?;
    Ok((header, message))
}

/// Split a server frame into its header and decoded event.
pub fn decode_event(mut frame: Bytes) -> Result<(EventHeader, OutboundEvent), ProtocolError> {
    let header = EventHeader::decode(&mut frame)?;
    let event = OutboundEvent::decode(header.event()?, frame)?;
    Ok((header, event))
}
