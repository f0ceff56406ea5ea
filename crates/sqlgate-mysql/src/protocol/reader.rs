//! Payload reading primitives.
//!
//! `PacketReader` walks a single packet payload and decodes the protocol's
//! primitive shapes: fixed-width little-endian integers, the variable-length
//! integer encoding, and the three string flavors (length-encoded,
//! null-terminated, fixed). All reads return `None` on underrun so callers
//! can turn a short payload into a protocol error at one place.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{EofPacket, ErrPacket, OkPacket};

/// Marker byte for a NULL cell in a text-protocol row.
pub const NULL_CELL: u8 = 0xFB;

#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Next byte without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Consume `n` bytes, returning the slice.
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    /// Skip `n` bytes; false if fewer remain.
    pub fn skip(&mut self, n: usize) -> bool {
        self.take(n).is_some()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u24_le(&mut self) -> Option<u32> {
        self.take(3)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.take(8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }

    /// Read a length-encoded integer.
    ///
    /// - `0x00..=0xFA`: the value itself
    /// - `0xFC`: 2 more bytes
    /// - `0xFD`: 3 more bytes
    /// - `0xFE`: 8 more bytes
    /// - `0xFB` is the NULL marker and yields `None`
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        match self.read_u8()? {
            tag @ 0x00..=0xFA => Some(u64::from(tag)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            _ => None,
        }
    }

    /// Read a length-encoded byte string.
    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.read_lenenc_int()? as usize;
        self.take(len)
    }

    /// Read a length-encoded byte string as UTF-8 (lossy).
    pub fn read_lenenc_string(&mut self) -> Option<String> {
        self.read_lenenc_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read bytes up to (and consuming) a NUL terminator.
    pub fn read_null_terminated(&mut self) -> Option<String> {
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == 0)?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Some(s)
    }

    /// Read everything left as raw bytes.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }

    /// Read everything left as UTF-8 text (lossy).
    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    /// Decode an OK packet body. The leading 0x00 marker is consumed if
    /// still present.
    pub fn decode_ok(&mut self) -> Option<OkPacket> {
        if self.peek() == Some(0x00) {
            self.skip(1);
        }
        let affected_rows = self.read_lenenc_int()?;
        let last_insert_id = self.read_lenenc_int()?;
        let status_flags = self.read_u16_le()?;
        let warnings = self.read_u16_le()?;
        let info = self.read_rest_string();
        Some(OkPacket {
            affected_rows,
            last_insert_id,
            status_flags,
            warnings,
            info,
        })
    }

    /// Decode an error packet body. The leading 0xFF marker is consumed if
    /// still present. The `#`-prefixed 5-byte SQLSTATE is optional on old
    /// servers.
    pub fn decode_err(&mut self) -> Option<ErrPacket> {
        if self.peek() == Some(0xFF) {
            self.skip(1);
        }
        let code = self.read_u16_le()?;
        let sqlstate = if self.peek() == Some(b'#') {
            self.skip(1);
            let state = self.take(5)?;
            Some(String::from_utf8_lossy(state).into_owned())
        } else {
            None
        };
        let message = self.read_rest_string();
        Some(ErrPacket {
            code,
            sqlstate,
            message,
        })
    }

    /// Decode an EOF packet body.
    pub fn decode_eof(&mut self) -> Option<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1);
        }
        let warnings = self.read_u16_le().unwrap_or(0);
        let status_flags = self.read_u16_le().unwrap_or(0);
        Some(EofPacket {
            warnings,
            status_flags,
        })
    }
}
