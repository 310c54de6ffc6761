//! TLS support for HTTP connections
//!
//! OpenSSL-backed TLS for the encrypted listener. The pieces the server
//! core relies on:
//!
//! 1. `TlsConfig` builds an `SslContext` once, at server start: protocol
//!    versions, certificate material (PEM file or the built-in test
//!    certificate), and the ALPN protocol list.
//! 2. `TlsSessionOps` implements `SessionOps` for the encrypted stream, so
//!    codecs are oblivious to the transport. The server-side handshake is
//!    bounded by the configured accept timeout, and the negotiated ALPN
//!    protocol is exposed for codec selection.

pub mod builtin_cert;
pub mod config;
pub mod session;

pub use config::{ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion};
pub use session::TlsSessionOps;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// Default handshake timeout in seconds, when none is configured
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;
