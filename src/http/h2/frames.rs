//! HTTP/2 frame types
//!
//! The frame vocabulary from RFC 7540 Section 6, as structs the codec
//! encodes to and the connection loops decode from.

use super::error::ErrorCode;
use super::settings::Settings;
use bytes::Bytes;
use std::ops::{BitOr, BitOrAssign};

/// HTTP/2 frame types (RFC 7540 Section 6)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Data = 0x0,
    Headers = 0x1,
    Priority = 0x2,
    RstStream = 0x3,
    Settings = 0x4,
    PushPromise = 0x5,
    Ping = 0x6,
    Goaway = 0x7,
    WindowUpdate = 0x8,
    Continuation = 0x9,
}

impl FrameType {
    /// The wire byte for this frame type
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Classify a wire byte; unknown types are `None` and must be ignored
    /// per RFC 7540 Section 4.1
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(FrameType::Data),
            0x1 => Some(FrameType::Headers),
            0x2 => Some(FrameType::Priority),
            0x3 => Some(FrameType::RstStream),
            0x4 => Some(FrameType::Settings),
            0x5 => Some(FrameType::PushPromise),
            0x6 => Some(FrameType::Ping),
            0x7 => Some(FrameType::Goaway),
            0x8 => Some(FrameType::WindowUpdate),
            0x9 => Some(FrameType::Continuation),
            _ => None,
        }
    }
}

/// HTTP/2 frame flags, one byte in the frame header.
///
/// Flag meaning depends on the frame type; `ACK` and `END_STREAM` share a
/// bit because no frame type carries both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const NONE: FrameFlags = FrameFlags(0);
    pub const END_STREAM: FrameFlags = FrameFlags(0x1);
    pub const ACK: FrameFlags = FrameFlags(0x1);
    pub const END_HEADERS: FrameFlags = FrameFlags(0x4);
    pub const PADDED: FrameFlags = FrameFlags(0x8);
    pub const PRIORITY: FrameFlags = FrameFlags(0x20);

    /// Reconstitute flags from the wire byte
    pub fn from_bits(bits: u8) -> Self {
        FrameFlags(bits)
    }

    /// The wire byte
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `flag` is set
    pub fn contains(self, flag: FrameFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn is_end_stream(self) -> bool {
        self.contains(Self::END_STREAM)
    }

    pub fn is_ack(self) -> bool {
        self.contains(Self::ACK)
    }

    pub fn is_end_headers(self) -> bool {
        self.contains(Self::END_HEADERS)
    }

    pub fn is_padded(self) -> bool {
        self.contains(Self::PADDED)
    }

    pub fn is_priority(self) -> bool {
        self.contains(Self::PRIORITY)
    }
}

impl BitOr for FrameFlags {
    type Output = FrameFlags;

    fn bitor(self, rhs: FrameFlags) -> FrameFlags {
        FrameFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for FrameFlags {
    fn bitor_assign(&mut self, rhs: FrameFlags) {
        self.0 |= rhs.0;
    }
}

/// DATA frame (RFC 7540 Section 6.1)
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub stream_id: u32,
    pub data: Bytes,
    pub end_stream: bool,
    /// Padding length when the PADDED flag is wanted
    pub padding: Option<u8>,
}

impl DataFrame {
    pub fn new(stream_id: u32, data: Bytes, end_stream: bool) -> Self {
        DataFrame {
            stream_id,
            data,
            end_stream,
            padding: None,
        }
    }

    pub fn with_padding(mut self, padding: u8) -> Self {
        self.padding = Some(padding);
        self
    }
}

/// HEADERS frame (RFC 7540 Section 6.2)
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    pub stream_id: u32,
    /// HPACK-encoded header block fragment
    pub header_block: Bytes,
    pub end_stream: bool,
    pub end_headers: bool,
    pub priority: Option<PrioritySpec>,
    pub padding: Option<u8>,
}

impl HeadersFrame {
    pub fn new(stream_id: u32, header_block: Bytes, end_stream: bool, end_headers: bool) -> Self {
        HeadersFrame {
            stream_id,
            header_block,
            end_stream,
            end_headers,
            priority: None,
            padding: None,
        }
    }
}

/// Priority fields of a HEADERS or PRIORITY frame (RFC 7540 Section 6.3).
///
/// Parsed for wire compatibility; priorities do not influence scheduling.
#[derive(Debug, Clone, Copy)]
pub struct PrioritySpec {
    pub stream_dependency: u32,
    pub exclusive: bool,
    /// Weight 1-256, stored minus one
    pub weight: u8,
}

/// RST_STREAM frame (RFC 7540 Section 6.4)
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    pub stream_id: u32,
    pub error_code: ErrorCode,
}

impl RstStreamFrame {
    pub fn new(stream_id: u32, error_code: ErrorCode) -> Self {
        RstStreamFrame {
            stream_id,
            error_code,
        }
    }
}

/// SETTINGS frame (RFC 7540 Section 6.5)
#[derive(Debug, Clone)]
pub struct SettingsFrame {
    pub ack: bool,
    pub settings: Settings,
}

impl SettingsFrame {
    pub fn new(settings: Settings) -> Self {
        SettingsFrame {
            ack: false,
            settings,
        }
    }

    /// An ACK carries no settings
    pub fn ack() -> Self {
        SettingsFrame {
            ack: true,
            settings: Settings::default(),
        }
    }
}

/// PING frame (RFC 7540 Section 6.7)
#[derive(Debug, Clone, Copy)]
pub struct PingFrame {
    pub ack: bool,
    /// Opaque payload, echoed verbatim in the ACK
    pub data: [u8; 8],
}

impl PingFrame {
    pub fn new(data: [u8; 8]) -> Self {
        PingFrame { ack: false, data }
    }

    pub fn ack(data: [u8; 8]) -> Self {
        PingFrame { ack: true, data }
    }
}

/// GOAWAY frame (RFC 7540 Section 6.8)
#[derive(Debug, Clone)]
pub struct GoawayFrame {
    pub last_stream_id: u32,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

impl GoawayFrame {
    pub fn new(last_stream_id: u32, error_code: ErrorCode, debug_data: Bytes) -> Self {
        GoawayFrame {
            last_stream_id,
            error_code,
            debug_data,
        }
    }
}

/// WINDOW_UPDATE frame (RFC 7540 Section 6.9)
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    /// Stream to credit; 0 credits the whole connection
    pub stream_id: u32,
    pub size_increment: u32,
}

impl WindowUpdateFrame {
    pub fn new(stream_id: u32, size_increment: u32) -> Self {
        WindowUpdateFrame {
            stream_id,
            size_increment,
        }
    }
}
