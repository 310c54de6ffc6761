//! Cleartext HTTP/1.1 to HTTP/2 upgrade (h2c)
//!
//! The negotiator answers one question per cleartext request: may this
//! connection switch to HTTP/2 in place? Eligibility requires the feature
//! flag, a maximum version of exactly HTTP/2, a current version of exactly
//! HTTP/1.1, a plaintext scheme, and the upgrade headers. TLS connections
//! never pass through here; they negotiate with ALPN.
//!
//! A non-eligible request is not an error; it proceeds as ordinary
//! HTTP/1.1.

use super::dispatch::{flatten_h2_error, request_service, ServeEnv};
use super::ServerConfig;
use crate::http::h2::H2Connection;
use crate::http::{
    HttpRequest, HttpResponse, HttpSession, Result, Scheme, SessionOps, Status, Version,
};
use std::net::SocketAddr;
use tracing::info;

/// The one value the `Upgrade` header may carry
const H2C_TOKEN: &str = "h2c";

/// The h2c eligibility predicate. All five conditions must hold.
pub(crate) fn eligible(config: &ServerConfig, scheme: Scheme, request: &HttpRequest) -> bool {
    config.h2c_upgrade
        && config.max_version == Version::Http2
        && request.version() == Version::Http11
        && scheme == Scheme::Http
        && request.headers().has_token("Connection", "upgrade")
        && request
            .headers()
            .get("Upgrade")
            .map(|v| v == H2C_TOKEN)
            .unwrap_or(false)
}

/// Perform the upgrade on an eligible request.
///
/// Acknowledges with `101 Switching Protocols` on the same byte stream,
/// then splices the transport into a fresh HTTP/2 connection seeded with
/// the already-parsed request - headers and fully buffered body included,
/// so no bytes are lost or duplicated across the protocol switch. The
/// HTTP/2 codec owns all framing from here on.
pub(crate) fn switch_protocols<S: SessionOps>(
    mut session: HttpSession<S>,
    request: HttpRequest,
    peer: SocketAddr,
    env: &ServeEnv,
) -> Result<()> {
    let ack = HttpResponse::builder()
        .status(Status::SWITCHING_PROTOCOLS)
        .header("Connection", "Upgrade")
        .header("Upgrade", H2C_TOKEN)
        .build();
    session.write_all(&ack.to_wire())?;
    session.flush()?;

    info!(%peer, uri = request.uri(), "switching connection to h2c");

    let service = request_service(env, peer, Scheme::Http);
    let mut conn = H2Connection::new(session, service);
    conn.upgrade(request).map_err(flatten_h2_error)?;
    conn.run().map_err(flatten_h2_error)
}
