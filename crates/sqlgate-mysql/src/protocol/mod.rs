//! MySQL wire protocol definitions.
//!
//! Every packet on the wire is framed as a 3-byte little-endian payload
//! length plus a 1-byte sequence number. A logical payload of
//! `MAX_PAYLOAD_SIZE` bytes or more is split across consecutive sequence
//! numbers, with a trailing zero-length frame when the payload is an exact
//! multiple of the frame size.

pub mod reader;
pub mod writer;

pub use reader::PacketReader;
pub use writer::{PacketWriter, encode_frames};

/// Maximum payload carried by a single frame (2^24 - 1 bytes).
pub const MAX_PAYLOAD_SIZE: usize = 0xFF_FF_FF;

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Client/server capability bits exchanged during the handshake.
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities this driver always requests.
    pub const BASE_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_LONG_PASSWORD
        | CLIENT_SECURE_CONNECTION
        | CLIENT_TRANSACTIONS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
}

/// Command codes sent as the first payload byte of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Close the session
    Quit = 0x01,
    /// Switch the default database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// Liveness check
    Ping = 0x0E,
}

/// Character set codes used in the handshake.
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const ASCII_GENERAL_CI: u8 = 11;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;

    /// Default charset requested by new connections.
    pub const DEFAULT_CHARSET: u8 = UTF8MB4_GENERAL_CI;

    /// Charset code for a supported encoding name, case-insensitive.
    pub fn for_encoding(name: &str) -> Option<u8> {
        match name.to_ascii_lowercase().as_str() {
            "utf8" => Some(UTF8_GENERAL_CI),
            "utf8mb4" => Some(UTF8MB4_GENERAL_CI),
            "latin1" => Some(LATIN1_SWEDISH_CI),
            "ascii" => Some(ASCII_GENERAL_CI),
            "binary" => Some(BINARY),
            _ => None,
        }
    }
}

/// Server status bits carried by OK and EOF packets.
#[allow(dead_code)]
pub mod server_status {
    pub const IN_TRANSACTION: u16 = 0x0001;
    pub const AUTOCOMMIT: u16 = 0x0002;
    pub const MORE_RESULTS_EXIST: u16 = 0x0008;
}

/// One frame header: payload length plus sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length (3 bytes on the wire)
    pub payload_length: u32,
    /// Sequence number, wrapping at 255
    pub sequence: u8,
}

impl FrameHeader {
    /// Decode a header from its 4 wire bytes.
    pub fn decode(bytes: &[u8; 4]) -> Self {
        Self {
            payload_length: u32::from(bytes[0])
                | (u32::from(bytes[1]) << 8)
                | (u32::from(bytes[2]) << 16),
            sequence: bytes[3],
        }
    }

    /// Encode the header into its 4 wire bytes.
    pub fn encode(self) -> [u8; 4] {
        let len = self.payload_length;
        [
            (len & 0xFF) as u8,
            ((len >> 8) & 0xFF) as u8,
            ((len >> 16) & 0xFF) as u8,
            self.sequence,
        ]
    }
}

/// What kind of response payload the first byte announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// OK / update-count packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Err,
    /// End-of-rows / end-of-metadata marker (0xFE with a short payload)
    Eof,
    /// Anything else: a column count, a field packet, or a row
    Data,
}

impl PacketKind {
    /// Classify a payload by its first byte.
    ///
    /// 0xFE only marks EOF when the payload is shorter than 9 bytes;
    /// longer payloads starting with 0xFE are length-encoded integers.
    pub fn classify(first: u8, payload_len: usize) -> Self {
        match first {
            0x00 => PacketKind::Ok,
            0xFF => PacketKind::Err,
            0xFE if payload_len < 9 => PacketKind::Eof,
            _ => PacketKind::Data,
        }
    }
}

/// Decoded OK packet: the server's answer to a non-result command.
#[derive(Debug, Clone)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

/// Decoded error packet. The state code and message are the server's,
/// verbatim.
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub code: u16,
    pub sqlstate: Option<String>,
    pub message: String,
}

/// Decoded EOF packet (pre-5.7 end-of-rows marker).
#[derive(Debug, Clone, Copy)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}
