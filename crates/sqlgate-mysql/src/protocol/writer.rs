//! Payload building primitives.
//!
//! `PacketWriter` accumulates one logical payload; `encode_frames` wraps a
//! finished payload into wire frames, splitting at `MAX_PAYLOAD_SIZE` and
//! appending the mandatory zero-length trailer when the payload is an exact
//! multiple of the frame size.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{Command, FrameHeader, MAX_PAYLOAD_SIZE};

#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Start a command payload: the command byte comes first.
    pub fn for_command(command: Command) -> Self {
        let mut w = Self::new();
        w.write_u8(command as u8);
        w
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u24_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write a length-encoded integer in its shortest form.
    pub fn write_lenenc_int(&mut self, value: u64) {
        match value {
            0..=0xFA => self.write_u8(value as u8),
            0xFB..=0xFFFF => {
                self.write_u8(0xFC);
                self.write_u16_le(value as u16);
            }
            0x1_0000..=0xFF_FFFF => {
                self.write_u8(0xFD);
                self.write_u24_le(value as u32);
            }
            _ => {
                self.write_u8(0xFE);
                self.buf.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    /// Write a length-encoded byte string.
    pub fn write_lenenc_bytes(&mut self, bytes: &[u8]) {
        self.write_lenenc_int(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    /// Write bytes followed by a NUL terminator.
    pub fn write_null_terminated(&mut self, bytes: &[u8]) {
        self.write_bytes(bytes);
        self.write_u8(0);
    }

    /// Pad with `n` zero bytes.
    pub fn write_zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    /// Finish the payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.buf
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf
    }
}

/// Frame a logical payload for the wire.
///
/// Returns the framed bytes and the sequence number the next packet in the
/// exchange must carry. Payloads of `MAX_PAYLOAD_SIZE` bytes or more are
/// split across consecutive frames; an exact multiple gets a trailing
/// zero-length frame so the receiver knows the payload has ended.
pub fn encode_frames(payload: &[u8], start_sequence: u8) -> (Vec<u8>, u8) {
    let mut out = Vec::with_capacity(payload.len() + 4);
    let mut sequence = start_sequence;
    let mut offset = 0;

    loop {
        let chunk_len = (payload.len() - offset).min(MAX_PAYLOAD_SIZE);
        let header = FrameHeader {
            payload_length: chunk_len as u32,
            sequence,
        };
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&payload[offset..offset + chunk_len]);
        offset += chunk_len;
        sequence = sequence.wrapping_add(1);

        // A full-size chunk means more follows, even if only an empty frame.
        if chunk_len < MAX_PAYLOAD_SIZE {
            break;
        }
    }

    (out, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenenc_int_boundaries() {
        let cases: &[(u64, Vec<u8>)] = &[
            (0, vec![0x00]),
            (0xFA, vec![0xFA]),
            (0xFB, vec![0xFC, 0xFB, 0x00]),
            (0xFFFF, vec![0xFC, 0xFF, 0xFF]),
            (0x1_0000, vec![0xFD, 0x00, 0x00, 0x01]),
            (0xFF_FFFF, vec![0xFD, 0xFF, 0xFF, 0xFF]),
            (
                0x100_0000,
                vec![0xFE, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00],
            ),
        ];
        for (value, expected) in cases {
            let mut w = PacketWriter::new();
            w.write_lenenc_int(*value);
            assert_eq!(w.payload(), expected.as_slice(), "value {value:#x}");
        }
    }

    #[test]
    fn lenenc_roundtrip_with_reader() {
        use crate::protocol::PacketReader;
        let mut w = PacketWriter::new();
        w.write_lenenc_int(300);
        w.write_lenenc_bytes(b"hello");
        let payload = w.into_payload();
        let mut r = PacketReader::new(&payload);
        assert_eq!(r.read_lenenc_int(), Some(300));
        assert_eq!(r.read_lenenc_bytes(), Some(&b"hello"[..]));
    }

    #[test]
    fn small_payload_is_one_frame() {
        let (framed, next) = encode_frames(&[1, 2, 3], 0);
        assert_eq!(framed, vec![0x03, 0x00, 0x00, 0x00, 1, 2, 3]);
        assert_eq!(next, 1);
    }

    #[test]
    fn empty_payload_is_one_empty_frame() {
        let (framed, next) = encode_frames(&[], 5);
        assert_eq!(framed, vec![0x00, 0x00, 0x00, 0x05]);
        assert_eq!(next, 6);
    }

    #[test]
    fn oversized_payload_is_split() {
        let payload = vec![0xAA; MAX_PAYLOAD_SIZE + 10];
        let (framed, next) = encode_frames(&payload, 0);

        let first = FrameHeader::decode(&[framed[0], framed[1], framed[2], framed[3]]);
        assert_eq!(first.payload_length as usize, MAX_PAYLOAD_SIZE);
        assert_eq!(first.sequence, 0);

        let second_start = 4 + MAX_PAYLOAD_SIZE;
        let second = FrameHeader::decode(&[
            framed[second_start],
            framed[second_start + 1],
            framed[second_start + 2],
            framed[second_start + 3],
        ]);
        assert_eq!(second.payload_length, 10);
        assert_eq!(second.sequence, 1);
        assert_eq!(framed.len(), payload.len() + 8);
        assert_eq!(next, 2);
    }

    #[test]
    fn exact_multiple_gets_empty_trailer() {
        let payload = vec![0x55; MAX_PAYLOAD_SIZE];
        let (framed, next) = encode_frames(&payload, 0);

        let trailer_start = 4 + MAX_PAYLOAD_SIZE;
        let trailer = FrameHeader::decode(&[
            framed[trailer_start],
            framed[trailer_start + 1],
            framed[trailer_start + 2],
            framed[trailer_start + 3],
        ]);
        assert_eq!(trailer.payload_length, 0);
        assert_eq!(trailer.sequence, 1);
        assert_eq!(framed.len(), payload.len() + 8);
        assert_eq!(next, 2);
    }

    #[test]
    fn command_payload_leads_with_code() {
        let mut w = PacketWriter::for_command(Command::Query);
        w.write_bytes(b"SELECT 1");
        assert_eq!(w.payload()[0], 0x03);
        assert_eq!(&w.payload()[1..], b"SELECT 1");
    }
}
