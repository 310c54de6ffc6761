//! HTTP/2 error types
//!
//! Error taxonomy for HTTP/2 operations plus the RFC 7540 Section 7 wire
//! error codes.

/// HTTP/2 errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the underlying HTTP/session layer
    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    /// Protocol violation (wire error code 0x1)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Flow-control violation (wire error code 0x3)
    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Frame received for a closed stream (wire error code 0x5)
    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    /// Frame size incorrect (wire error code 0x6)
    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// Stream reset by the peer (wire error code 0x8)
    #[error("Stream cancelled: {0}")]
    Cancel(u32),

    /// HPACK state failure (wire error code 0x9)
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid settings value
    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Too many concurrent streams
    #[error("Too many concurrent streams")]
    TooManyStreams,

    /// Connection closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Client did not send the connection preface
    #[error("Missing connection preface")]
    MissingPreface,

    /// Malformed header block
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
}

impl Error {
    /// Wire error code to put in GOAWAY/RST_STREAM for this error
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_) | Error::MissingPreface | Error::InvalidHeader(_) => {
                ErrorCode::ProtocolError
            }
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Cancel(_) => ErrorCode::Cancel,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::TooManyStreams => ErrorCode::RefusedStream,
            _ => ErrorCode::InternalError,
        }
    }
}

/// HTTP/2 error codes as defined in RFC 7540 Section 7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    const ALL: [ErrorCode; 14] = [
        ErrorCode::NoError,
        ErrorCode::ProtocolError,
        ErrorCode::InternalError,
        ErrorCode::FlowControlError,
        ErrorCode::SettingsTimeout,
        ErrorCode::StreamClosed,
        ErrorCode::FrameSizeError,
        ErrorCode::RefusedStream,
        ErrorCode::Cancel,
        ErrorCode::CompressionError,
        ErrorCode::ConnectError,
        ErrorCode::EnhanceYourCalm,
        ErrorCode::InadequateSecurity,
        ErrorCode::Http11Required,
    ];

    /// The 32-bit wire value
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Classify a wire value; codes beyond the registry are `None`
    pub fn from_u32(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_u32() == code)
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::NoError.as_u32(), 0x0);
        assert_eq!(ErrorCode::ProtocolError.as_u32(), 0x1);
        assert_eq!(ErrorCode::Http11Required.as_u32(), 0xd);

        for code in 0x0..=0xd {
            assert_eq!(ErrorCode::from_u32(code).map(ErrorCode::as_u32), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(0xe), None);
        assert_eq!(ErrorCode::from_u32(0xff), None);
    }

    #[test]
    fn test_wire_code_mapping() {
        assert_eq!(
            Error::Protocol("x".into()).wire_code(),
            ErrorCode::ProtocolError
        );
        assert_eq!(Error::MissingPreface.wire_code(), ErrorCode::ProtocolError);
        assert_eq!(
            Error::Compression("x".into()).wire_code(),
            ErrorCode::CompressionError
        );
        assert_eq!(Error::TooManyStreams.wire_code(), ErrorCode::RefusedStream);
        assert_eq!(Error::ConnectionClosed.wire_code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_error_display() {
        let err = Error::Protocol("test error".to_string());
        assert_eq!(err.to_string(), "Protocol error: test error");

        let err = Error::StreamClosed(42);
        assert_eq!(err.to_string(), "Stream closed: 42");
    }
}
