//! Network primitives for the accept path
//!
//! This module owns listener setup (reuse-address/reuse-port binding with an
//! explicit backlog) and the readiness machinery the accept loops race on:
//! a self-pipe release signal and a two-way poll(2) over {release, listener}.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::RawFd;
use std::time::Duration;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Network setup and readiness errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },

    #[error("failed to create wake pipe: {0}")]
    WakePipe(io::Error),
}

/// Bind a listening socket with reuse-address and reuse-port semantics.
///
/// Reuse-port lets several workers accept on the same address without a
/// single shared accept queue becoming the bottleneck.
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let bind_err = |source| Error::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.set_reuse_port(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;

    Ok(socket.into())
}

/// Outcome of racing "release requested" against "connection ready".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReady {
    /// The listening socket has a connection ready to accept
    Connection,
    /// The release signal fired; the loop must stop accepting
    Released,
    /// Neither side became ready within the timeout
    TimedOut,
}

/// Wait for either the release signal or an acceptable connection.
///
/// A release that arrives together with a ready connection wins the race;
/// shutdown must not be delayed by a busy listener.
pub fn await_accept(
    listener_fd: RawFd,
    release_fd: RawFd,
    timeout: Option<Duration>,
) -> Result<AcceptReady> {
    let mut fds = [
        libc::pollfd {
            fd: release_fd,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: listener_fd,
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1);

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), 2, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(AcceptReady::TimedOut);
        }
        return Err(Error::Io(err));
    }
    if rc == 0 {
        return Ok(AcceptReady::TimedOut);
    }

    if fds[0].revents != 0 {
        Ok(AcceptReady::Released)
    } else {
        Ok(AcceptReady::Connection)
    }
}

/// Create a self-pipe wake pair.
///
/// The write end signals, the read end is polled. Both ends are
/// non-blocking; a full pipe means a wake is already pending, which is
/// equivalent to signaling again.
pub fn wake_pipe() -> Result<(WakeTx, WakeRx)> {
    let mut fds = [0 as RawFd; 2];
    let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(Error::WakePipe(io::Error::last_os_error()));
    }

    for fd in fds {
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, libc::O_NONBLOCK) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fds[0]);
                libc::close(fds[1]);
            }
            return Err(Error::WakePipe(err));
        }
    }

    Ok((WakeTx { fd: fds[1] }, WakeRx { fd: fds[0] }))
}

/// Write end of a wake pipe
#[derive(Debug)]
pub struct WakeTx {
    fd: RawFd,
}

impl WakeTx {
    /// Signal the read end. Never blocks; EAGAIN means a wake is already
    /// queued, so the signal is delivered either way.
    pub fn wake(&self) {
        let byte = [1u8];
        unsafe {
            libc::write(self.fd, byte.as_ptr() as *const libc::c_void, 1);
        }
    }
}

impl Drop for WakeTx {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Read end of a wake pipe
#[derive(Debug)]
pub struct WakeRx {
    fd: RawFd,
}

impl WakeRx {
    /// Raw descriptor for polling
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for WakeRx {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}
