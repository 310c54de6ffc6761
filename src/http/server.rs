//! HTTP/1.1 server-side exchange primitives
//!
//! `HttpServer` drives one connection's request/response exchanges over any
//! `SessionOps` transport. The connection loop itself (keep-alive policy,
//! upgrade hook, codec selection) lives in the server core; this type only
//! knows how to receive one request and send one response.

use super::{
    chunked, Error, HttpRequest, HttpResponse, HttpSession, RequestParser, Result, SessionOps,
    Status,
};

/// HTTP/1.1 server side of a connection
pub struct HttpServer<S: SessionOps> {
    session: HttpSession<S>,
}

impl<S: SessionOps> HttpServer<S> {
    /// Create a new HTTP server over a raw transport
    pub fn new(session: S) -> Self {
        HttpServer {
            session: HttpSession::new(session),
        }
    }

    /// Set the timeout for I/O operations
    pub fn set_timeout(&mut self, timeout: std::time::Duration) {
        self.session.set_timeout(Some(timeout));
    }

    /// Receive one HTTP request.
    ///
    /// Returns `Ok(None)` when the peer closes (or goes idle past the
    /// timeout) before sending any bytes: the normal end of a keep-alive
    /// connection. A disconnect mid-request is an error.
    pub fn receive_request(&mut self) -> Result<Option<HttpRequest>> {
        let mut parser = RequestParser::new();
        let mut received_any = false;

        loop {
            let mut temp = [0u8; 4096];
            let n = match self.session.read(&mut temp) {
                Ok(n) => n,
                Err(Error::Timeout) if !received_any => return Ok(None),
                Err(e) => return Err(e),
            };

            if n == 0 {
                if received_any {
                    return Err(Error::ConnectionClosed);
                }
                return Ok(None);
            }
            received_any = true;

            if let Some(request) = parser.parse(&temp[..n])? {
                return Ok(Some(request));
            }
        }
    }

    /// Send an HTTP response.
    ///
    /// The body framing header is finalized here: a response carrying
    /// `Transfer-Encoding: chunked` has its body chunk-encoded; anything
    /// else gets an exact `Content-Length`.
    pub fn send_response(&mut self, response: &HttpResponse) -> Result<()> {
        let mut resp = response.clone();

        let is_chunked = resp
            .headers()
            .get("Transfer-Encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        if is_chunked {
            resp.headers_mut().remove("Content-Length");
            let body = resp.body().to_vec();
            resp.set_body(chunked::encode_chunks(&[&body])?);
        } else if !resp.headers().contains("Content-Length") {
            let content_length = resp.body().len().to_string();
            resp.headers_mut().insert("Content-Length", content_length);
        }

        self.session.write_all(&resp.to_wire())?;
        self.session.flush()
    }

    /// Send a bare status with a plain-text body
    pub fn send_error(&mut self, status: Status, message: &str) -> Result<()> {
        let response = HttpResponse::builder()
            .status(status)
            .header("Content-Type", "text/plain")
            .body(message.as_bytes().to_vec())
            .build();

        self.send_response(&response)
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    /// Consume the server and return the underlying session
    ///
    /// Used when the connection stops speaking HTTP/1.1 (h2c upgrade).
    pub fn into_session(self) -> HttpSession<S> {
        self.session
    }
}
