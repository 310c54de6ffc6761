//! Connection dispatch and protocol selection
//!
//! Every accepted socket lands here on its own thread. The plaintext path
//! goes straight into the HTTP/1.1 loop, which consults the h2c upgrade
//! negotiator on each request. The TLS path runs the bounded handshake
//! first, then selects a codec from the ALPN outcome.
//!
//! Codecs are values implementing [`ConnectionCodec`], picked at run time
//! by [`select_codec`]; a codec owns the connection until it returns.

use super::upgrade;
use super::{RequestContext, ServerConfig};
use crate::http::h2::{self, H2Connection};
use crate::http::session::FdSessionOps;
use crate::http::tls::TlsConfig;
use crate::http::{
    Error, HttpRequest, HttpResponse, HttpServer, HttpSession, Result, Scheme, SessionOps, Status,
    Version,
};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use tracing::{debug, warn};

/// A connection's transport, type-erased so the codec can be chosen after
/// negotiation
pub type BoxedSession = Box<dyn SessionOps + Send>;

/// Shared state every connection handler needs
pub struct ServeEnv {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) handler: super::RequestHandler,
    pub(crate) error_handler: super::ErrorHandler,
}

/// A protocol codec that can take over an accepted connection
pub trait ConnectionCodec: Send + Sync {
    /// Codec name for logs
    fn name(&self) -> &'static str;

    /// Serve the connection until it ends
    fn serve(
        &self,
        session: BoxedSession,
        peer: SocketAddr,
        scheme: Scheme,
        env: &ServeEnv,
    ) -> Result<()>;
}

/// The HTTP/1.1 codec
pub struct Http1;

/// The HTTP/2 codec
pub struct Http2;

static HTTP1_CODEC: Http1 = Http1;
static HTTP2_CODEC: Http2 = Http2;

/// Map a negotiated ALPN protocol to a codec.
///
/// `h2` selects HTTP/2; `http/1.1`, `http/1.0`, no ALPN at all, and
/// anything unrecognized select HTTP/1.1. The ALPN outcome is
/// authoritative here; the configured maximum version is not re-checked.
pub fn select_codec(negotiated: Option<&[u8]>) -> &'static dyn ConnectionCodec {
    match negotiated {
        Some(proto) if proto == b"h2" => &HTTP2_CODEC,
        _ => &HTTP1_CODEC,
    }
}

/// Entry point for plaintext connections
pub(crate) fn serve_plain(env: &ServeEnv, stream: TcpStream, peer: SocketAddr) {
    debug!(%peer, "accepted cleartext connection");

    let session: BoxedSession = Box::new(FdSessionOps::new(stream));
    if let Err(e) = HTTP1_CODEC.serve(session, peer, Scheme::Http, env) {
        warn!(%peer, error = %e, "connection handler failed");
    }
}

/// Entry point for TLS connections: bounded handshake, then ALPN-driven
/// codec selection
pub(crate) fn serve_tls(env: &ServeEnv, tls: &TlsConfig, stream: TcpStream, peer: SocketAddr) {
    let tls_session = match tls.accept(stream, env.config.accept_timeout) {
        Ok(session) => session,
        Err(e) => {
            // Dropped without ceremony; the accept loop is unaffected
            warn!(%peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let negotiated = tls_session.selected_alpn();
    let codec = select_codec(negotiated.as_deref());
    debug!(
        %peer,
        codec = codec.name(),
        alpn = ?negotiated.as_deref().map(String::from_utf8_lossy),
        "accepted TLS connection"
    );

    let session: BoxedSession = Box::new(tls_session);
    if let Err(e) = codec.serve(session, peer, Scheme::Https, env) {
        warn!(%peer, error = %e, "connection handler failed");
    }
}

/// Whether the request forbids reusing the connection afterwards
fn wants_close(request: &HttpRequest) -> bool {
    request.headers().has_token("Connection", "close")
        || (request.version() == Version::Http10
            && !request.headers().has_token("Connection", "keep-alive"))
}

impl ConnectionCodec for Http1 {
    fn name(&self) -> &'static str {
        "http/1.1"
    }

    fn serve(
        &self,
        session: BoxedSession,
        peer: SocketAddr,
        scheme: Scheme,
        env: &ServeEnv,
    ) -> Result<()> {
        let mut server = HttpServer::new(session);

        loop {
            let request = match server.receive_request() {
                Ok(Some(request)) => request,
                // Keep-alive connection ended
                Ok(None) => {
                    let _ = server.close();
                    return Ok(());
                }
                // A malformed request gets a 400 before the connection goes
                Err(
                    e @ (Error::Parse(_)
                    | Error::InvalidMethod(_)
                    | Error::InvalidVersion(_)
                    | Error::InvalidHeader(_)),
                ) => {
                    let _ = server.send_error(Status::BAD_REQUEST, "bad request");
                    let _ = server.close();
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            // The upgrade question comes before the handler on every
            // request; ineligibility just means plain HTTP/1.1
            if upgrade::eligible(&env.config, scheme, &request) {
                return upgrade::switch_protocols(server.into_session(), request, peer, env);
            }

            let close = wants_close(&request);
            let response_version = match request.version() {
                Version::Http10 => Version::Http10,
                _ => Version::Http11,
            };

            let ctx = RequestContext {
                request,
                peer,
                scheme,
            };
            let mut response = match (env.handler)(&ctx) {
                Ok(response) => response,
                Err(e) => (env.error_handler)(peer, Some(&ctx.request), &e),
            };
            response.set_version(response_version);

            server.send_response(&response)?;

            if close {
                let _ = server.close();
                return Ok(());
            }
        }
    }
}

impl ConnectionCodec for Http2 {
    fn name(&self) -> &'static str {
        "h2"
    }

    fn serve(
        &self,
        session: BoxedSession,
        peer: SocketAddr,
        scheme: Scheme,
        env: &ServeEnv,
    ) -> Result<()> {
        let service = request_service(env, peer, scheme);
        let mut conn = H2Connection::new(HttpSession::new(session), service);

        conn.accept().map_err(flatten_h2_error)?;
        conn.run().map_err(flatten_h2_error)
    }
}

/// Bind the application handler and error handler into the one-shot
/// request service shape the HTTP/2 connection wants
pub(crate) fn request_service(
    env: &ServeEnv,
    peer: SocketAddr,
    scheme: Scheme,
) -> impl FnMut(HttpRequest) -> HttpResponse {
    let handler = env.handler.clone();
    let error_handler = env.error_handler.clone();

    move |request: HttpRequest| {
        let ctx = RequestContext {
            request,
            peer,
            scheme,
        };
        match (handler)(&ctx) {
            Ok(response) => response,
            Err(e) => (error_handler)(peer, Some(&ctx.request), &e),
        }
    }
}

/// HTTP/2 errors wrap session-layer errors; unwrap those and stringify
/// protocol-level ones for the connection log
pub(crate) fn flatten_h2_error(error: h2::Error) -> Error {
    match error {
        h2::Error::Http(inner) => inner,
        other => Error::Protocol(other.to_string()),
    }
}
