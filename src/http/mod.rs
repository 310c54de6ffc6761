//! HTTP protocol layer
//!
//! Message types, parsing, and the HTTP/1.1 and HTTP/2 codecs the server
//! core dispatches accepted connections to.
//!
//! # Architecture
//!
//! All HTTP I/O goes through a session operations abstraction so the same
//! codec code serves plain TCP and TLS connections:
//!
//! - `SessionOps` trait defines transport operations (poll, read, write, close)
//! - `HttpSession` layers poll-gated timeouts on top of any `SessionOps`
//! - Codecs are written against the trait and never see the transport

pub mod chunked;
pub mod client;
pub mod h2;
pub mod headers;
pub mod message;
pub mod parser;
pub mod scheme;
pub mod server;
pub mod session;
pub mod tls;

pub use client::HttpClient;
pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, Method, Status, Version};
pub use parser::{RequestParser, ResponseParser};
pub use scheme::Scheme;
pub use server::HttpServer;
pub use session::{HttpSession, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] crate::net::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tls::TlsError),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Incomplete message")]
    Incomplete,

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Handler error: {0}")]
    Handler(String),
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
