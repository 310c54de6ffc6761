//! TLS session operations
//!
//! `SessionOps` over an OpenSSL stream, so the HTTP codecs drive encrypted
//! connections through the same interface as plain TCP. The server-side
//! handshake is bounded by a timeout; the negotiated ALPN protocol is kept
//! for codec selection.

use super::config::{TlsConfig, TlsError};
use crate::http::session::{self, PollEvents, SessionOps};
use crate::http::{Error, Result as HttpResult};
use openssl::ssl::{Ssl, SslStream};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// TLS session operations
pub struct TlsSessionOps {
    stream: SslStream<TcpStream>,
    failed: bool,
}

impl TlsSessionOps {
    /// Create a client TLS connection (perform handshake)
    pub fn connect(tcp_stream: TcpStream, config: TlsConfig) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        if let Some(ref servername) = config.servername {
            ssl.set_hostname(servername)?;
        }

        let ssl_stream = ssl
            .connect(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Connection failed: {}", e)))?;

        Ok(TlsSessionOps {
            stream: ssl_stream,
            failed: false,
        })
    }

    /// Accept a client connection with TLS (perform handshake).
    ///
    /// The handshake is bounded by `timeout` via socket read/write
    /// timeouts; a client that connects and goes silent cannot pin the
    /// handling task forever.
    pub fn accept(
        tcp_stream: TcpStream,
        config: TlsConfig,
        timeout: Duration,
    ) -> Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        tcp_stream.set_read_timeout(Some(timeout))?;
        tcp_stream.set_write_timeout(Some(timeout))?;

        let ssl_stream = ssl
            .accept(tcp_stream)
            .map_err(|e| TlsError::HandshakeFailed(format!("Accept failed: {}", e)))?;

        // Post-handshake I/O is paced by the session timeout instead
        ssl_stream.get_ref().set_read_timeout(None)?;
        ssl_stream.get_ref().set_write_timeout(None)?;

        Ok(TlsSessionOps {
            stream: ssl_stream,
            failed: false,
        })
    }

    /// The ALPN protocol negotiated during the handshake, if any
    pub fn selected_alpn(&self) -> Option<Vec<u8>> {
        self.stream
            .ssl()
            .selected_alpn_protocol()
            .map(|p| p.to_vec())
    }

    /// Negotiated TLS version string
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Check if TLS failed
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl SessionOps for TlsSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> HttpResult<bool> {
        // Data already decrypted inside the SSL buffer counts as readable
        if events != PollEvents::Write && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        session::poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> HttpResult<usize> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(Error::Io(e))
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> HttpResult<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.failed = true;
                Err(Error::Io(e))
            }
        }
    }

    fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn close(&mut self) -> HttpResult<()> {
        if !self.failed {
            let _ = self.stream.shutdown();
        }

        use std::net::Shutdown;
        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }
}
