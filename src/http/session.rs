//! Session operations abstraction
//!
//! The transport seam between codecs and sockets: the same HTTP/1.1 and
//! HTTP/2 code drives plain TCP and TLS connections through `SessionOps`.
//! The trait is object-safe so the connection dispatcher can pick a codec
//! at run time and hand it a `Box<dyn SessionOps + Send>`.

use super::{Error, Result};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Session operations trait
///
/// Operations a codec may perform on a connection, abstracting over plain
/// TCP and TLS transports.
pub trait SessionOps {
    /// Poll the session for readiness
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush buffered output
    fn flush(&mut self) -> Result<()>;

    /// Close the session
    fn close(&mut self) -> Result<()>;
}

impl<T: SessionOps + ?Sized> SessionOps for Box<T> {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        (**self).poll(events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// poll(2) one descriptor for readiness; `None` waits indefinitely.
///
/// Shared by the plain-TCP and TLS session implementations.
pub(crate) fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: match events {
            PollEvents::Read => libc::POLLIN,
            PollEvents::Write => libc::POLLOUT,
            PollEvents::Both => libc::POLLIN | libc::POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1);
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(rc > 0)
}

/// HTTP session wrapping a transport with timeout-gated I/O
pub struct HttpSession<S: SessionOps> {
    transport: S,
    timeout: Option<Duration>,
}

impl<S: SessionOps> HttpSession<S> {
    /// Wrap a transport with the default 10 second timeout
    pub fn new(transport: S) -> Self {
        HttpSession {
            transport,
            timeout: Some(Duration::from_secs(10)),
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Get the timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read data, waiting at most the configured timeout for readiness
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.transport.poll(PollEvents::Read, self.timeout)? {
            return Err(Error::Timeout);
        }
        self.transport.read(buf)
    }

    /// Write data, waiting at most the configured timeout for readiness
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.transport.poll(PollEvents::Write, self.timeout)? {
            return Err(Error::Timeout);
        }
        self.transport.write(buf)
    }

    /// Write the whole buffer
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            match self.write(&buf[written..])? {
                0 => return Err(Error::ConnectionClosed),
                n => written += n,
            }
        }
        Ok(())
    }

    /// Flush buffered output
    pub fn flush(&mut self) -> Result<()> {
        self.transport.flush()
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    /// Borrow the underlying transport
    pub fn get_ref(&self) -> &S {
        &self.transport
    }

    /// Borrow the underlying transport mutably
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    /// Consume the wrapper and return the underlying transport
    pub fn into_inner(self) -> S {
        self.transport
    }
}

/// Plain TCP session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush().map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already gone; close is best-effort
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_fd_session_ops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"Hello").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = FdSessionOps::new(stream);

        assert!(session
            .poll(PollEvents::Read, Some(Duration::from_secs(1)))
            .unwrap());

        let mut buf = [0u8; 5];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_http_session_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let _handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(2));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = from_tcp_stream(stream);
        session.set_timeout(Some(Duration::from_millis(100)));

        let mut buf = [0u8; 10];
        let result = session.read(&mut buf);
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn test_boxed_session_ops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"boxed").unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let boxed: Box<dyn SessionOps + Send> = Box::new(FdSessionOps::new(stream));
        let mut session = HttpSession::new(boxed);

        let mut buf = [0u8; 5];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"boxed");

        handle.join().unwrap();
    }
}
