//! Framed packet transport over a byte stream.
//!
//! One logical payload per `write_packet`/`read_packet` call; the splitting
//! and reassembly of oversized payloads happens here, so everything above
//! deals in whole payloads only. I/O failure marks the connection dead; the
//! reconnect machinery lives a layer up.

use std::io::{Read, Write};

use sqlgate_core::{ConnectionErrorKind, Error, Result};

use crate::protocol::{FRAME_HEADER_SIZE, FrameHeader, MAX_PAYLOAD_SIZE, encode_frames};

#[derive(Debug)]
pub struct PacketTransport<S> {
    stream: S,
    sequence: u8,
}

impl<S: Read + Write> PacketTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            sequence: 0,
        }
    }

    /// Sequence number the next frame will carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Reset sequence numbering for a new command exchange.
    pub fn reset_sequence(&mut self) {
        self.sequence = 0;
    }

    /// Continue an exchange at a given sequence (used mid-handshake).
    pub fn set_sequence(&mut self, sequence: u8) {
        self.sequence = sequence;
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Frame and send one logical payload.
    pub fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let (framed, next_sequence) = encode_frames(payload, self.sequence);
        self.stream.write_all(&framed).map_err(lost)?;
        self.stream.flush().map_err(lost)?;
        self.sequence = next_sequence;
        Ok(())
    }

    /// Read one logical payload, reassembling continuation frames.
    pub fn read_packet(&mut self) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let mut header_bytes = [0u8; FRAME_HEADER_SIZE];
            self.stream.read_exact(&mut header_bytes).map_err(lost)?;
            let header = FrameHeader::decode(&header_bytes);

            if header.sequence != self.sequence {
                return Err(Error::protocol(format!(
                    "out-of-order packet: expected sequence {}, got {}",
                    self.sequence, header.sequence
                )));
            }
            self.sequence = self.sequence.wrapping_add(1);

            let chunk_len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + chunk_len, 0);
            self.stream
                .read_exact(&mut payload[start..])
                .map_err(lost)?;

            // A non-full frame ends the payload.
            if chunk_len < MAX_PAYLOAD_SIZE {
                break;
            }
        }
        Ok(payload)
    }
}

fn lost(err: std::io::Error) -> Error {
    Error::Connection(sqlgate_core::ConnectionError {
        kind: ConnectionErrorKind::Disconnected,
        message: format!("connection lost: {err}"),
        source: Some(Box::new(err)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    // A loopback stream: writes land in `out`, reads come from `input`.
    struct Pipe {
        input: Cursor<Vec<u8>>,
        out: Vec<u8>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.out.write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn transport_over(input: Vec<u8>) -> PacketTransport<Pipe> {
        PacketTransport::new(Pipe {
            input: Cursor::new(input),
            out: Vec::new(),
        })
    }

    #[test]
    fn small_payload_roundtrip() {
        let payload = b"SELECT 1".to_vec();
        let (framed, _) = encode_frames(&payload, 0);

        let mut t = transport_over(framed);
        assert_eq!(t.read_packet().unwrap(), payload);
        assert_eq!(t.sequence(), 1);
    }

    #[test]
    fn oversized_payload_roundtrip() {
        let payload: Vec<u8> = (0..MAX_PAYLOAD_SIZE + 1000)
            .map(|i| (i % 251) as u8)
            .collect();
        let (framed, _) = encode_frames(&payload, 0);

        let mut t = transport_over(framed);
        assert_eq!(t.read_packet().unwrap(), payload);
        assert_eq!(t.sequence(), 2);
    }

    #[test]
    fn exact_multiple_payload_roundtrip() {
        let payload = vec![7u8; MAX_PAYLOAD_SIZE];
        let (framed, _) = encode_frames(&payload, 0);

        let mut t = transport_over(framed);
        assert_eq!(t.read_packet().unwrap(), payload);
    }

    #[test]
    fn write_then_read_back() {
        let payload = vec![0xAB; 100];
        let mut t = transport_over(Vec::new());
        t.write_packet(&payload).unwrap();
        assert_eq!(t.sequence(), 1);

        let written = t.into_stream().out;
        let mut back = transport_over(written);
        assert_eq!(back.read_packet().unwrap(), payload);
    }

    #[test]
    fn out_of_order_sequence_is_a_protocol_error() {
        let (framed, _) = encode_frames(b"x", 3);
        let mut t = transport_over(framed);
        let err = t.read_packet().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn truncated_stream_is_connection_fatal() {
        // header promises 10 bytes, stream carries 2
        let mut framed = FrameHeader {
            payload_length: 10,
            sequence: 0,
        }
        .encode()
        .to_vec();
        framed.extend_from_slice(&[1, 2]);

        let mut t = transport_over(framed);
        let err = t.read_packet().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            Error::Connection(c) if c.kind == ConnectionErrorKind::Disconnected
        ));
    }
}
