//! Little-endian field readers and writers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::ProtocolError;
use crate::cache::{Plane, TileKey};

/// Cursor over a message payload that reports truncation as an error.
pub(crate) struct Reader {
    buf: Bytes,
}

impl Reader {
    pub(crate) fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, len: usize, field: &'static str) -> Result<(), ProtocolError> {
        if self.buf.remaining() < len {
            return Err(ProtocolError::Truncated {
                field,
                needed: len,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub(crate) fn u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn bool(&mut self, field: &'static str) -> Result<bool, ProtocolError> {
        Ok(self.u8(field)? != 0)
    }

    pub(crate) fn u16(&mut self, field: &'static str) -> Result<u16, ProtocolError> {
        self.need(2, field)?;
        Ok(self.buf.get_u16_le())
    }

    pub(crate) fn u32(&mut self, field: &'static str) -> Result<u32, ProtocolError> {
        self.need(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    pub(crate) fn i32(&mut self, field: &'static str) -> Result<i32, ProtocolError> {
        self.need(4, field)?;
        Ok(self.buf.get_i32_le())
    }

    pub(crate) fn f32(&mut self, field: &'static str) -> Result<f32, ProtocolError> {
        self.need(4, field)?;
        Ok(self.buf.get_f32_le())
    }

    pub(crate) fn string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let len = self.u16(field)? as usize;
        self.need(len, field)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
    }

    pub(crate) fn plane(&mut self) -> Result<Plane, ProtocolError> {
        Ok(Plane::new(self.i32("channel")?, self.i32("stokes")?))
    }

    pub(crate) fn tile_keys(&mut self) -> Result<Vec<TileKey>, ProtocolError> {
        let count = self.u32("tile_count")? as usize;
        self.need(count.saturating_mul(8), "tiles")?;
        let mut keys = Vec::with_capacity(count);
        for _ in 0..count {
            keys.push(TileKey::new(self.buf.get_i32_le(), self.buf.get_i32_le()));
        }
        Ok(keys)
    }

    pub(crate) fn f32_values(&mut self, count: usize) -> Result<Vec<f32>, ProtocolError> {
        self.need(count.saturating_mul(4), "pixels")?;
        Ok((0..count).map(|_| self.buf.get_f32_le()).collect())
    }

    pub(crate) fn i32_values(&mut self, field: &'static str) -> Result<Vec<i32>, ProtocolError> {
        let count = self.u32(field)? as usize;
        self.need(count.saturating_mul(4), field)?;
        Ok((0..count).map(|_| self.buf.get_i32_le()).collect())
    }

    /// Length-prefixed byte block.
    pub(crate) fn block(&mut self, field: &'static str) -> Result<Bytes, ProtocolError> {
        let len = self.u32(field)? as usize;
        self.need(len, field)?;
        Ok(self.buf.split_to(len))
    }

    /// Fail if bytes remain after the last field.
    pub(crate) fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.has_remaining() {
            return Err(ProtocolError::TrailingBytes(self.buf.remaining()));
        }
        Ok(())
    }
}

pub(crate) fn put_string(buf: &mut BytesMut, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.put_u16_le(len as u16);
    buf.put_slice(&bytes[..len]);
}

pub(crate) fn put_plane(buf: &mut BytesMut, plane: Plane) {
    buf.put_i32_le(plane.z);
    buf.put_i32_le(plane.stokes);
}

pub(crate) fn put_tile_keys(buf: &mut BytesMut, keys: &[TileKey]) {
    buf.put_u32_le(keys.len() as u32);
    for key in keys {
        buf.put_i32_le(key.x);
        buf.put_i32_le(key.y);
    }
}
