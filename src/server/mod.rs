//! Server core: lifecycle, configuration, and connection dispatch
//!
//! This is the connection-acceptance and protocol-negotiation layer. A
//! [`Server`] is pure configuration plus handlers; [`Server::start`] binds
//! the plaintext listener (and the TLS listener when configured), spins up
//! the per-listener accept workers, and returns a [`Command`] that owns
//! every listening socket and release signal until [`Command::shutdown`].
//!
//! Per-connection protocol choice happens in [`dispatch`]: TLS connections
//! follow the ALPN result, cleartext connections speak HTTP/1.1 unless an
//! eligible h2c upgrade ([`upgrade`]) switches them to HTTP/2 mid-flight.

pub mod acceptor;
pub mod dispatch;
pub mod upgrade;

pub use acceptor::{AcceptorPool, Releaser};
pub use dispatch::{select_codec, ConnectionCodec, Http1, Http2};

use crate::http::tls::TlsConfig;
use crate::http::{Error, HttpRequest, HttpResponse, Result, Scheme, Status, Version};
use dispatch::ServeEnv;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a handler gets to see about one request
pub struct RequestContext {
    /// The parsed request
    pub request: HttpRequest,
    /// Remote address of the connection
    pub peer: SocketAddr,
    /// Plaintext or encrypted
    pub scheme: Scheme,
}

/// Application request handler: one request in, one response out
pub type RequestHandler = Arc<dyn Fn(&RequestContext) -> Result<HttpResponse> + Send + Sync>;

/// Error handler: invoked by a codec when an exchange cannot complete
pub type ErrorHandler =
    Arc<dyn Fn(SocketAddr, Option<&HttpRequest>, &Error) -> HttpResponse + Send + Sync>;

/// TLS listener block: where to bind and what certificate to present.
///
/// Without a certificate file the built-in self-signed certificate is used.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Bind address for the encrypted listener
    pub addr: SocketAddr,
    /// PEM file carrying certificate and private key
    pub cert_file: Option<PathBuf>,
}

impl TlsSettings {
    /// TLS on `addr` with the built-in certificate
    pub fn new(addr: SocketAddr) -> Self {
        TlsSettings {
            addr,
            cert_file: None,
        }
    }

    /// Use certificate material from a PEM file
    pub fn with_cert_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_file = Some(path.into());
        self
    }
}

/// Server configuration, immutable for the server's lifetime
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address for the plaintext listener
    pub addr: SocketAddr,
    /// Accept backlog for each listening socket
    pub backlog: i32,
    /// Number of accept workers per listener
    pub workers: usize,
    /// Highest HTTP version the server negotiates
    pub max_version: Version,
    /// Optional TLS listener
    pub tls: Option<TlsSettings>,
    /// Whether cleartext HTTP/1.1 connections may upgrade to HTTP/2
    pub h2c_upgrade: bool,
    /// Bound on the TLS accept handshake
    pub accept_timeout: Duration,
}

impl ServerConfig {
    /// Create a configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

/// Builder for [`ServerConfig`]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        ServerConfigBuilder {
            config: ServerConfig {
                addr: SocketAddr::from(([127, 0, 0, 1], 0)),
                backlog: 128,
                workers: 1,
                max_version: Version::Http11,
                tls: None,
                h2c_upgrade: false,
                accept_timeout: Duration::from_secs(
                    crate::http::tls::DEFAULT_HANDSHAKE_TIMEOUT_SECS,
                ),
            },
        }
    }
}

impl ServerConfigBuilder {
    /// Set the plaintext bind address
    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.config.addr = addr;
        self
    }

    /// Set the accept backlog
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Set the number of accept workers per listener
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    /// Set the highest HTTP version to negotiate
    pub fn max_version(mut self, version: Version) -> Self {
        self.config.max_version = version;
        self
    }

    /// Add a TLS listener
    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Enable the cleartext HTTP/1.1 to HTTP/2 upgrade
    pub fn h2c_upgrade(mut self, enabled: bool) -> Self {
        self.config.h2c_upgrade = enabled;
        self
    }

    /// Bound the TLS accept handshake
    pub fn accept_timeout(mut self, timeout: Duration) -> Self {
        self.config.accept_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// An HTTP server: configuration plus handlers. Construction does no I/O.
pub struct Server {
    config: Arc<ServerConfig>,
    handler: RequestHandler,
    error_handler: ErrorHandler,
}

impl Server {
    /// Create a server with the default error handler (log and answer 500)
    pub fn new<H>(config: ServerConfig, handler: H) -> Self
    where
        H: Fn(&RequestContext) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        Server {
            config: Arc::new(config),
            handler: Arc::new(handler),
            error_handler: Arc::new(default_error_handler),
        }
    }

    /// Create a server with an explicit error handler
    pub fn with_error_handler<H, E>(config: ServerConfig, handler: H, error_handler: E) -> Self
    where
        H: Fn(&RequestContext) -> Result<HttpResponse> + Send + Sync + 'static,
        E: Fn(SocketAddr, Option<&HttpRequest>, &Error) -> HttpResponse + Send + Sync + 'static,
    {
        Server {
            config: Arc::new(config),
            handler: Arc::new(handler),
            error_handler: Arc::new(error_handler),
        }
    }

    /// The server's configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind all listeners and start their accept workers.
    ///
    /// Does not return until every accept worker has started. Bind
    /// failures are fatal and propagate; everything after that point is
    /// per-connection and contained.
    pub fn start(&self) -> Result<Command> {
        let env = Arc::new(ServeEnv {
            config: self.config.clone(),
            handler: self.handler.clone(),
            error_handler: self.error_handler.clone(),
        });

        let plain_env = env.clone();
        let plain = AcceptorPool::listen(
            self.config.addr,
            self.config.backlog,
            self.config.workers,
            Arc::new(move |stream, peer| dispatch::serve_plain(&plain_env, stream, peer)),
        )?;

        let addr = plain.listener.local_addr()?;
        let mut listeners = vec![plain.listener];
        let mut releasers = plain.releasers;
        let mut workers = plain.workers;
        let mut tls_addr = None;

        if let Some(tls_settings) = &self.config.tls {
            let tls_config = self.build_tls_config(tls_settings)?;
            let tls_env = env.clone();
            let tls_pool = AcceptorPool::listen(
                tls_settings.addr,
                self.config.backlog,
                self.config.workers,
                Arc::new(move |stream, peer| {
                    dispatch::serve_tls(&tls_env, &tls_config, stream, peer)
                }),
            )?;

            tls_addr = Some(tls_pool.listener.local_addr()?);
            listeners.push(tls_pool.listener);
            releasers.extend(tls_pool.releasers);
            workers.extend(tls_pool.workers);
        }

        info!(%addr, tls_addr = ?tls_addr, workers = self.config.workers, "server started");

        Ok(Command {
            addr,
            tls_addr,
            listeners: Mutex::new(listeners),
            releasers,
            workers: Mutex::new(workers),
        })
    }

    /// TLS context for the encrypted listener. The advertised ALPN list
    /// follows the configured maximum version; the negotiated outcome is
    /// honored by the dispatcher either way.
    fn build_tls_config(&self, tls_settings: &TlsSettings) -> Result<TlsConfig> {
        let mut builder = TlsConfig::server();
        if let Some(path) = &tls_settings.cert_file {
            builder = builder.cert_file(path).map_err(Error::Tls)?;
        }

        let alpn: &[&str] = if self.config.max_version >= Version::Http2 {
            &["h2", "http/1.1", "http/1.0"]
        } else {
            &["http/1.1", "http/1.0"]
        };

        let config = builder
            .alpn(alpn)
            .map_err(Error::Tls)?
            .build()
            .map_err(Error::Tls)?;
        Ok(config)
    }
}

/// Default error handler: log the fault and answer 500
fn default_error_handler(
    peer: SocketAddr,
    request: Option<&HttpRequest>,
    error: &Error,
) -> HttpResponse {
    warn!(%peer, uri = request.map(|r| r.uri()), error = %error, "request handler failed");
    HttpResponse::builder()
        .status(Status::INTERNAL_SERVER_ERROR)
        .header("Content-Type", "text/plain")
        .body(b"internal server error".to_vec())
        .build()
}

/// Handle over a started server: every listening socket and every accept
/// worker's release signal, aggregated across the plaintext and TLS pools.
pub struct Command {
    addr: SocketAddr,
    tls_addr: Option<SocketAddr>,
    listeners: Mutex<Vec<TcpListener>>,
    releasers: Vec<Releaser>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Command {
    /// Address the plaintext listener is bound to
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address the TLS listener is bound to, if TLS is configured
    pub fn tls_addr(&self) -> Option<SocketAddr> {
        self.tls_addr
    }

    /// Per-worker release actions, one per accept loop
    pub fn releasers(&self) -> &[Releaser] {
        &self.releasers
    }

    /// Graceful shutdown: release every accept worker, wait for the loops
    /// to wind down, then close the listening sockets.
    ///
    /// Release precedes close so no loop sees its socket vanish
    /// mid-accept. Safe to call more than once: releasers are idempotent
    /// and the sockets are drained from the handle the first time.
    /// In-flight connection handlers are never aborted.
    pub fn shutdown(&self) {
        info!(addr = %self.addr, "server shutdown requested");

        for releaser in &self.releasers {
            releaser.release();
        }

        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if worker.join().is_err() {
                warn!("accept worker panicked before shutdown");
            }
        }

        // Closing is dropping; failures surface nowhere and are
        // best-effort by design
        if let Ok(mut guard) = self.listeners.lock() {
            guard.clear();
        }

        info!(addr = %self.addr, "server shutdown complete");
    }
}
