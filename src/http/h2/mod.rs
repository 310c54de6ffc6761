//! HTTP/2 protocol implementation
//!
//! Frame-level HTTP/2 for the server core: the wire codec, SETTINGS
//! handling, stream accounting, flow control, the server-side connection
//! state machine, and a test client.
//!
//! An HTTP/2 connection reaches this module along one of two paths, both
//! chosen by the server core's dispatcher:
//!
//! - **ALPN**: the TLS handshake negotiated `h2`; [`server::H2Connection::accept`]
//!   expects the client connection preface on a fresh transport.
//! - **h2c upgrade**: an HTTP/1.1 request carried `Upgrade: h2c`;
//!   [`server::H2Connection::upgrade`] takes over the transport with the
//!   already-parsed request as stream 1.
//!
//! HPACK header compression is provided by the `hpack` crate; frame
//! payloads are `bytes::Bytes`.

pub mod client;
pub mod codec;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod server;
pub mod settings;
pub mod stream;

pub use client::{H2Client, H2Response};
pub use error::{Error, ErrorCode, Result};
pub use frames::{DataFrame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use server::H2Connection;
pub use settings::{Settings, SettingsBuilder};
pub use stream::{StreamId, StreamState};

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
