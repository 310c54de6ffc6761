//! HTTP/1.x message parsing
//!
//! Incremental parsers for requests and responses. Feed bytes as they
//! arrive; a complete message is returned once the head and any
//! Content-Length body have been consumed.

use super::{Error, Headers, HttpRequest, HttpResponse, Method, Result, Status, Version};

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parse an HTTP request line: `METHOD URI VERSION`
pub fn parse_request_line(line: &str) -> Result<(Method, String, Version)> {
    let mut parts = line.split_whitespace();
    let (method, uri, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(u), Some(v), None) => (m, u, v),
        _ => {
            return Err(Error::Parse(format!("Invalid request line: {:?}", line)));
        }
    };

    Ok((method.parse()?, uri.to_string(), version.parse()?))
}

/// Parse an HTTP status line: `VERSION STATUS [REASON]`
pub fn parse_status_line(line: &str) -> Result<(Version, Status, String)> {
    let mut parts = line.splitn(3, ' ');
    let (version, code) = match (parts.next(), parts.next()) {
        (Some(v), Some(c)) => (v, c),
        _ => {
            return Err(Error::Parse(format!("Invalid status line: {:?}", line)));
        }
    };

    let version: Version = version.parse()?;
    let code: u16 = code
        .parse()
        .map_err(|_| Error::Parse(format!("Invalid status code: {}", code)))?;
    let status = Status::new(code)?;
    let reason = match parts.next() {
        Some(text) => text.to_string(),
        None => status.reason_phrase().to_string(),
    };

    Ok((version, status, reason))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ParserState {
    StartLine,
    Headers,
    Body,
    Complete,
}

/// Incremental HTTP request parser
pub struct RequestParser {
    state: ParserState,
    buffer: Vec<u8>,
    method: Option<Method>,
    uri: Option<String>,
    version: Option<Version>,
    headers: Headers,
}

impl RequestParser {
    /// Create a new request parser
    pub fn new() -> Self {
        RequestParser {
            state: ParserState::StartLine,
            buffer: Vec::new(),
            method: None,
            uri: None,
            version: None,
            headers: Headers::new(),
        }
    }

    /// Feed data to the parser
    ///
    /// Returns `Ok(Some(request))` when a complete request is parsed,
    /// `Ok(None)` if more data is needed, or `Err` on a parse error.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<HttpRequest>> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.state {
                ParserState::StartLine => {
                    let Some(crlf_pos) = find_crlf(&self.buffer) else {
                        return Ok(None);
                    };
                    let line = String::from_utf8_lossy(&self.buffer[..crlf_pos]).to_string();
                    self.buffer.drain(..crlf_pos + 2);

                    let (method, uri, version) = parse_request_line(&line)?;
                    self.method = Some(method);
                    self.uri = Some(uri);
                    self.version = Some(version);
                    self.state = ParserState::Headers;
                }
                ParserState::Headers => {
                    let Some(crlf_pos) = find_crlf(&self.buffer) else {
                        return Ok(None);
                    };
                    if crlf_pos == 0 {
                        self.buffer.drain(..2);
                        self.state = ParserState::Body;
                        continue;
                    }

                    let line = String::from_utf8_lossy(&self.buffer[..crlf_pos]).to_string();
                    self.buffer.drain(..crlf_pos + 2);

                    let (name, value) = Headers::parse_header_line(&line)?;
                    self.headers.insert(name, value);
                }
                ParserState::Body => {
                    let content_length = self.content_length()?;
                    if self.buffer.len() < content_length {
                        return Ok(None);
                    }
                    let body: Vec<u8> = self.buffer.drain(..content_length).collect();
                    self.state = ParserState::Complete;
                    return Ok(Some(self.finish(body)));
                }
                ParserState::Complete => return Ok(None),
            }
        }
    }

    fn content_length(&self) -> Result<usize> {
        match self.headers.get("Content-Length") {
            Some(cl) => cl
                .parse::<usize>()
                .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", cl))),
            None => Ok(0),
        }
    }

    fn finish(&mut self, body: Vec<u8>) -> HttpRequest {
        let mut req = HttpRequest::builder()
            .method(self.method.take().unwrap_or(Method::Get))
            .uri(self.uri.take().unwrap_or_default())
            .version(self.version.take().unwrap_or_default())
            .body(body)
            .build();
        *req.headers_mut() = std::mem::take(&mut self.headers);
        req
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental HTTP response parser
pub struct ResponseParser {
    state: ParserState,
    buffer: Vec<u8>,
    version: Option<Version>,
    status: Option<Status>,
    reason: Option<String>,
    headers: Headers,
}

impl ResponseParser {
    /// Create a new response parser
    pub fn new() -> Self {
        ResponseParser {
            state: ParserState::StartLine,
            buffer: Vec::new(),
            version: None,
            status: None,
            reason: None,
            headers: Headers::new(),
        }
    }

    /// Feed data to the parser
    ///
    /// Returns `Ok(Some(response))` when a complete response is parsed,
    /// `Ok(None)` if more data is needed, or `Err` on a parse error.
    pub fn parse(&mut self, data: &[u8]) -> Result<Option<HttpResponse>> {
        self.buffer.extend_from_slice(data);

        loop {
            match self.state {
                ParserState::StartLine => {
                    let Some(crlf_pos) = find_crlf(&self.buffer) else {
                        return Ok(None);
                    };
                    let line = String::from_utf8_lossy(&self.buffer[..crlf_pos]).to_string();
                    self.buffer.drain(..crlf_pos + 2);

                    let (version, status, reason) = parse_status_line(&line)?;
                    self.version = Some(version);
                    self.status = Some(status);
                    self.reason = Some(reason);
                    self.state = ParserState::Headers;
                }
                ParserState::Headers => {
                    let Some(crlf_pos) = find_crlf(&self.buffer) else {
                        return Ok(None);
                    };
                    if crlf_pos == 0 {
                        self.buffer.drain(..2);
                        self.state = ParserState::Body;
                        continue;
                    }

                    let line = String::from_utf8_lossy(&self.buffer[..crlf_pos]).to_string();
                    self.buffer.drain(..crlf_pos + 2);

                    let (name, value) = Headers::parse_header_line(&line)?;
                    self.headers.insert(name, value);
                }
                ParserState::Body => {
                    // Informational responses carry no body; the next
                    // message follows immediately (101 switches protocols)
                    let informational =
                        self.status.map(|s| s.is_informational()).unwrap_or(false);
                    let content_length = if informational {
                        0
                    } else {
                        self.content_length()?
                    };
                    if self.buffer.len() < content_length {
                        return Ok(None);
                    }
                    let body: Vec<u8> = self.buffer.drain(..content_length).collect();
                    self.state = ParserState::Complete;
                    return Ok(Some(self.finish(body)));
                }
                ParserState::Complete => return Ok(None),
            }
        }
    }

    fn content_length(&self) -> Result<usize> {
        match self.headers.get("Content-Length") {
            Some(cl) => cl
                .parse::<usize>()
                .map_err(|_| Error::Parse(format!("Invalid Content-Length: {}", cl))),
            None => Ok(0),
        }
    }

    fn finish(&mut self, body: Vec<u8>) -> HttpResponse {
        let status = self.status.take().unwrap_or(Status::OK);
        let mut resp = HttpResponse::builder()
            .version(self.version.take().unwrap_or_default())
            .status(status)
            .reason(
                self.reason
                    .take()
                    .unwrap_or_else(|| status.reason_phrase().to_string()),
            )
            .body(body)
            .build();
        *resp.headers_mut() = std::mem::take(&mut self.headers);
        resp
    }

    /// Bytes fed to the parser but not consumed by the completed message
    pub fn remaining(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the unconsumed bytes out of the parser
    pub fn take_remaining(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Reset the parser for reuse, keeping unconsumed bytes
    pub fn reset(&mut self) {
        self.state = ParserState::StartLine;
        self.version = None;
        self.status = None;
        self.reason = None;
        self.headers.clear();
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        let (method, uri, version) = parse_request_line("GET /index.html HTTP/1.1").unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(uri, "/index.html");
        assert_eq!(version, Version::Http11);
    }

    #[test]
    fn test_parse_status_line() {
        let (version, status, reason) = parse_status_line("HTTP/1.1 200 OK").unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 200);
        assert_eq!(reason, "OK");

        let (_, status, reason) = parse_status_line("HTTP/1.0 404").unwrap();
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "Not Found");
    }

    #[test]
    fn test_request_parser_with_body() {
        let mut parser = RequestParser::new();

        let data = b"POST /submit HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let req = parser.parse(data).unwrap().unwrap();

        assert_eq!(req.method(), Method::Post);
        assert_eq!(req.uri(), "/submit");
        assert_eq!(req.body(), b"hello");
    }

    #[test]
    fn test_request_parser_incremental() {
        let mut parser = RequestParser::new();

        assert!(parser.parse(b"GET /a HTTP").unwrap().is_none());
        assert!(parser.parse(b"/1.1\r\nHost: x\r\n").unwrap().is_none());
        let req = parser.parse(b"\r\n").unwrap().unwrap();

        assert_eq!(req.uri(), "/a");
        assert_eq!(req.headers().get("Host"), Some("x"));
    }

    #[test]
    fn test_response_parser_simple() {
        let mut parser = ResponseParser::new();

        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nHello";
        let resp = parser.parse(data).unwrap().unwrap();

        assert_eq!(resp.status().code(), 200);
        assert_eq!(resp.body(), b"Hello");
    }

    #[test]
    fn test_response_parser_informational_keeps_following_bytes() {
        let mut parser = ResponseParser::new();

        // A 101 has no body; whatever follows belongs to the next protocol
        let data = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: h2c\r\n\r\n\x00\x01\x02";
        let resp = parser.parse(data).unwrap().unwrap();

        assert_eq!(resp.status().code(), 101);
        assert!(resp.body().is_empty());
        assert_eq!(parser.remaining(), &[0x00, 0x01, 0x02]);
    }

    #[test]
    fn test_request_parser_rejects_garbage() {
        let mut parser = RequestParser::new();
        assert!(parser.parse(b"NOT-A-METHOD / HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"Hello\r\nWorld"), Some(5));
        assert_eq!(find_crlf(b"NoEOL"), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
    }
}
