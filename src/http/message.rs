//! HTTP message types
//!
//! Request/response values shared by the HTTP/1.1 and HTTP/2 codecs. An
//! HTTP/2 exchange travels in the same shapes; only the framing around
//! them differs.

use super::{Error, Headers, Result, CRLF};
use std::fmt;
use std::str::FromStr;

/// HTTP request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    /// The method token as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        const KNOWN: [Method; 9] = [
            Method::Get,
            Method::Head,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Connect,
            Method::Options,
            Method::Trace,
            Method::Patch,
        ];
        KNOWN
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::InvalidMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP protocol version
///
/// The derived ordering follows the wire (major, minor) pair, so "current
/// version vs. configured maximum" is a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    Http10,
    Http11,
    Http2,
}

impl Version {
    /// The version token as it appears on an HTTP/1.x start line
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
            Version::Http2 => "HTTP/2.0",
        }
    }

    /// (major, minor) pair
    pub fn parts(&self) -> (u8, u8) {
        match self {
            Version::Http10 => (1, 0),
            Version::Http11 => (1, 1),
            Version::Http2 => (2, 0),
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            // Both spellings appear in the wild
            "HTTP/2.0" | "HTTP/2" => Ok(Version::Http2),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Version {
    fn default() -> Self {
        Version::Http11
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u16);

impl Status {
    pub const SWITCHING_PROTOCOLS: Status = Status(101);
    pub const OK: Status = Status(200);
    pub const BAD_REQUEST: Status = Status(400);
    pub const NOT_FOUND: Status = Status(404);
    pub const INTERNAL_SERVER_ERROR: Status = Status(500);

    /// Validate and wrap a status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status(code))
        } else {
            Err(Error::InvalidStatus(format!("Invalid status code: {}", code)))
        }
    }

    /// The numeric code
    pub fn code(&self) -> u16 {
        self.0
    }

    /// Canonical reason phrase for this code
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            426 => "Upgrade Required",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "Unknown",
        }
    }

    /// 1xx: provisional, no body follows
    pub fn is_informational(&self) -> bool {
        self.0 / 100 == 1
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        self.0 / 100 == 2
    }

    /// 4xx
    pub fn is_client_error(&self) -> bool {
        self.0 / 100 == 4
    }

    /// 5xx
    pub fn is_server_error(&self) -> bool {
        self.0 / 100 == 5
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason_phrase())
    }
}

/// HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    uri: String,
    version: Version,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpRequest {
    /// Start building a request; unset fields default to `GET / HTTP/1.1`
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder {
            request: HttpRequest {
                method: Method::Get,
                uri: "/".to_string(),
                version: Version::default(),
                headers: Headers::new(),
                body: Vec::new(),
            },
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Serialize to HTTP/1.x wire format
    pub fn to_wire(&self) -> Vec<u8> {
        let start = format!(
            "{} {} {}{}",
            self.method.as_str(),
            self.uri,
            self.version.as_str(),
            CRLF
        );

        let mut buf = Vec::with_capacity(start.len() + 256 + self.body.len());
        buf.extend_from_slice(start.as_bytes());
        self.headers.write_to(&mut buf);
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Builder for [`HttpRequest`]
#[derive(Debug)]
pub struct HttpRequestBuilder {
    request: HttpRequest,
}

impl HttpRequestBuilder {
    pub fn method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.request.uri = uri.into();
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.request.version = version;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.request.body = body;
        self
    }

    pub fn build(self) -> HttpRequest {
        self.request
    }
}

impl Default for HttpRequestBuilder {
    fn default() -> Self {
        HttpRequest::builder()
    }
}

/// HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    version: Version,
    status: Status,
    reason: String,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpResponse {
    /// Start building a response; unset fields default to `HTTP/1.1 200 OK`
    pub fn builder() -> HttpResponseBuilder {
        HttpResponseBuilder {
            response: HttpResponse {
                version: Version::default(),
                status: Status::OK,
                reason: Status::OK.reason_phrase().to_string(),
                headers: Headers::new(),
                body: Vec::new(),
            },
            reason_overridden: false,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Serialize to HTTP/1.x wire format
    pub fn to_wire(&self) -> Vec<u8> {
        let start = format!(
            "{} {} {}{}",
            self.version.as_str(),
            self.status.code(),
            self.reason,
            CRLF
        );

        let mut buf = Vec::with_capacity(start.len() + 256 + self.body.len());
        buf.extend_from_slice(start.as_bytes());
        self.headers.write_to(&mut buf);
        buf.extend_from_slice(&self.body);
        buf
    }
}

/// Builder for [`HttpResponse`]
#[derive(Debug)]
pub struct HttpResponseBuilder {
    response: HttpResponse,
    reason_overridden: bool,
}

impl HttpResponseBuilder {
    pub fn version(mut self, version: Version) -> Self {
        self.response.version = version;
        self
    }

    /// Set the status; the reason phrase follows unless one was set
    /// explicitly
    pub fn status(mut self, status: Status) -> Self {
        self.response.status = status;
        if !self.reason_overridden {
            self.response.reason = status.reason_phrase().to_string();
        }
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.response.reason = reason.into();
        self.reason_overridden = true;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.response.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.response.body = body;
        self
    }

    pub fn build(self) -> HttpResponse {
        self.response
    }
}

impl Default for HttpResponseBuilder {
    fn default() -> Self {
        HttpResponse::builder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("POST".parse::<Method>().unwrap(), Method::Post);
        assert!("INVALID".parse::<Method>().is_err());
        assert!("get".parse::<Method>().is_err());
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("HTTP/1.0".parse::<Version>().unwrap(), Version::Http10);
        assert_eq!("HTTP/1.1".parse::<Version>().unwrap(), Version::Http11);
        assert_eq!("HTTP/2.0".parse::<Version>().unwrap(), Version::Http2);
        assert_eq!("HTTP/2".parse::<Version>().unwrap(), Version::Http2);
        assert!("HTTP/3.0".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::Http10 < Version::Http11);
        assert!(Version::Http11 < Version::Http2);
        assert!(Version::Http2 <= Version::Http2);
        assert_eq!(Version::Http2.parts(), (2, 0));
    }

    #[test]
    fn test_status() {
        let status = Status::new(200).unwrap();
        assert_eq!(status.code(), 200);
        assert_eq!(status.reason_phrase(), "OK");
        assert!(status.is_success());
        assert!(!status.is_client_error());

        assert_eq!(Status::SWITCHING_PROTOCOLS.code(), 101);
        assert!(Status::SWITCHING_PROTOCOLS.is_informational());
        assert!(Status::new(42).is_err());
        assert!(Status::new(600).is_err());
    }

    #[test]
    fn test_request_builder() {
        let req = HttpRequest::builder()
            .method(Method::Post)
            .uri("/test")
            .header("Content-Type", "text/plain")
            .body(b"Hello".to_vec())
            .build();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.uri(), "/test");
        assert_eq!(req.body(), b"Hello");
        assert_eq!(req.headers().get("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_request_builder_defaults() {
        let req = HttpRequest::builder().build();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.uri(), "/");
        assert_eq!(req.version(), Version::Http11);
    }

    #[test]
    fn test_request_to_wire() {
        let req = HttpRequest::builder()
            .method(Method::Get)
            .uri("/")
            .header("Host", "example.com")
            .build();

        let wire = String::from_utf8(req.to_wire()).unwrap();
        assert!(wire.starts_with("GET / HTTP/1.1\r\n"));
        assert!(wire.contains("Host: example.com\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_response_to_wire() {
        let resp = HttpResponse::builder()
            .status(Status::new(200).unwrap())
            .header("Content-Length", "0")
            .build();

        let wire = String::from_utf8(resp.to_wire()).unwrap();
        assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(wire.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn test_response_reason_follows_status() {
        let resp = HttpResponse::builder().status(Status::NOT_FOUND).build();
        assert_eq!(resp.reason(), "Not Found");

        // An explicit reason survives a later status change
        let resp = HttpResponse::builder()
            .reason("Custom")
            .status(Status::NOT_FOUND)
            .build();
        assert_eq!(resp.reason(), "Custom");
    }
}
