//! Acceptor pool
//!
//! One listening socket per pool, `workers` independent accept loops on it.
//! Each loop races the release signal against socket readiness and forks a
//! detached handling thread per accepted connection, so one bad connection
//! can never take the loop down.
//!
//! `listen` holds the caller at a start barrier until every worker has
//! entered its loop: a returned pool is never partially initialized.

use crate::net::{self, AcceptReady, WakeRx, WakeTx};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Per-connection callback run on a freshly forked thread
pub type ConnCallback = Arc<dyn Fn(TcpStream, SocketAddr) + Send + Sync>;

/// A started pool: the listening socket it bound, one release action per
/// worker, and the worker join handles
pub struct Pool {
    /// The listening socket (workers hold dups of it)
    pub listener: TcpListener,
    /// One release action per accept worker
    pub releasers: Vec<Releaser>,
    /// Worker join handles, in worker order
    pub workers: Vec<JoinHandle<()>>,
}

/// Acceptor pool entry point
pub struct AcceptorPool;

impl AcceptorPool {
    /// Bind `addr` and start `workers` accept loops feeding `on_conn`.
    ///
    /// Blocks until every worker has started. The listening socket uses
    /// reuse-address and reuse-port; each worker accepts on its own dup of
    /// the socket in non-blocking mode.
    pub fn listen(
        addr: SocketAddr,
        backlog: i32,
        workers: usize,
        on_conn: ConnCallback,
    ) -> net::Result<Pool> {
        let listener = net::bind_listener(addr, backlog)?;
        let local = listener.local_addr()?;

        // Workers plus the caller: listen returns only once all loops run
        let started = Arc::new(Barrier::new(workers + 1));
        let mut releasers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (tx, rx) = net::wake_pipe()?;
            let worker_listener = listener.try_clone().map_err(net::Error::Io)?;
            worker_listener.set_nonblocking(true).map_err(net::Error::Io)?;

            let barrier = started.clone();
            let on_conn = on_conn.clone();
            let handle = thread::Builder::new()
                .name(format!("accept-{}-{}", local.port(), index))
                .spawn(move || accept_loop(worker_listener, rx, barrier, on_conn, index))
                .map_err(net::Error::Io)?;

            releasers.push(Releaser::new(tx));
            handles.push(handle);
        }

        started.wait();
        debug!(addr = %local, workers, "acceptor pool listening");

        Ok(Pool {
            listener,
            releasers,
            workers: handles,
        })
    }
}

/// One accept loop: race release against readiness, fork a handler per
/// accepted connection
fn accept_loop(
    listener: TcpListener,
    wake: WakeRx,
    started: Arc<Barrier>,
    on_conn: ConnCallback,
    index: usize,
) {
    started.wait();
    debug!(worker = index, "accept loop started");

    loop {
        match net::await_accept(listener.as_raw_fd(), wake.as_raw_fd(), None) {
            Ok(AcceptReady::Released) => break,
            Ok(AcceptReady::TimedOut) => continue,
            Ok(AcceptReady::Connection) => match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(worker = index, %peer, error = %e, "failed to prepare accepted socket");
                        continue;
                    }
                    fork_handler(stream, peer, &on_conn, index);
                }
                // Another worker on the same socket won this connection
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    warn!(worker = index, error = %e, "accept failed");
                }
            },
            Err(e) => {
                warn!(worker = index, error = %e, "accept poll failed");
                break;
            }
        }
    }

    debug!(worker = index, "accept loop released");
}

/// Fork an independent, detached handling thread for one connection.
/// Handler outcomes are the callback's business; spawn failures only cost
/// this one connection.
fn fork_handler(stream: TcpStream, peer: SocketAddr, on_conn: &ConnCallback, index: usize) {
    let on_conn = on_conn.clone();
    let spawned = thread::Builder::new()
        .name(format!("conn-{}", peer))
        .spawn(move || on_conn(stream, peer));

    if let Err(e) = spawned {
        warn!(worker = index, %peer, error = %e, "failed to fork connection handler");
    }
}

/// Release action for one accept worker.
///
/// Signals the worker's cancellation point without blocking; the worker
/// finishes its current race and stops accepting. Idempotent: releasing
/// twice is indistinguishable from releasing once.
pub struct Releaser {
    tx: WakeTx,
    released: AtomicBool,
}

impl Releaser {
    fn new(tx: WakeTx) -> Self {
        Releaser {
            tx,
            released: AtomicBool::new(false),
        }
    }

    /// Signal the worker to stop accepting. Never blocks.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.tx.wake();
        }
    }

    /// Whether release has been signaled
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn echo_callback(counter: Arc<AtomicUsize>) -> ConnCallback {
        Arc::new(move |mut stream: TcpStream, _peer| {
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 4];
            if stream.read_exact(&mut buf).is_ok() {
                let _ = stream.write_all(&buf);
            }
        })
    }

    #[test]
    fn test_listen_starts_all_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = AcceptorPool::listen(
            "127.0.0.1:0".parse().unwrap(),
            16,
            3,
            echo_callback(counter.clone()),
        )
        .unwrap();

        assert_eq!(pool.releasers.len(), 3);
        assert_eq!(pool.workers.len(), 3);

        // The barrier has been passed, so a connection is served
        // immediately without sleeps
        let addr = pool.listener.local_addr().unwrap();
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        for releaser in &pool.releasers {
            releaser.release();
        }
        for worker in pool.workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_release_one_worker_keeps_socket_serving() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = AcceptorPool::listen(
            "127.0.0.1:0".parse().unwrap(),
            16,
            2,
            echo_callback(counter.clone()),
        )
        .unwrap();
        let addr = pool.listener.local_addr().unwrap();

        pool.releasers[0].release();
        assert!(pool.releasers[0].is_released());
        assert!(!pool.releasers[1].is_released());

        // The other worker still accepts on the shared socket
        for _ in 0..3 {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"ping").unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).unwrap();
        }
        assert!(counter.load(Ordering::SeqCst) >= 3);

        pool.releasers[1].release();
        for worker in pool.workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_release_is_idempotent() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = AcceptorPool::listen(
            "127.0.0.1:0".parse().unwrap(),
            16,
            1,
            echo_callback(counter),
        )
        .unwrap();

        pool.releasers[0].release();
        pool.releasers[0].release();
        pool.releasers[0].release();

        for worker in pool.workers {
            worker.join().unwrap();
        }
    }

    #[test]
    fn test_released_worker_terminates_promptly() {
        let counter = Arc::new(AtomicUsize::new(0));
        let pool = AcceptorPool::listen(
            "127.0.0.1:0".parse().unwrap(),
            16,
            1,
            echo_callback(counter),
        )
        .unwrap();

        pool.releasers[0].release();

        let done = Arc::new(AtomicBool::new(false));
        let done_flag = done.clone();
        let workers = pool.workers;
        let joiner = thread::spawn(move || {
            for worker in workers {
                worker.join().unwrap();
            }
            done_flag.store(true, Ordering::SeqCst);
        });

        // Bounded wait: the loop must exit without any connection arriving
        for _ in 0..100 {
            if done.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(done.load(Ordering::SeqCst), "worker did not exit on release");
        joiner.join().unwrap();
    }

    #[test]
    fn test_bad_connection_does_not_stop_the_loop() {
        let handler: ConnCallback = Arc::new(move |_stream, _peer| {
            panic!("handler blew up");
        });
        let pool =
            AcceptorPool::listen("127.0.0.1:0".parse().unwrap(), 16, 1, handler).unwrap();
        let addr = pool.listener.local_addr().unwrap();

        // The panicking handler runs on its own thread; the accept loop
        // keeps taking connections afterwards
        let _first = TcpStream::connect(addr).unwrap();
        let second = TcpStream::connect(addr);
        assert!(second.is_ok());

        pool.releasers[0].release();
        for worker in pool.workers {
            worker.join().unwrap();
        }
    }
}
