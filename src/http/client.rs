//! HTTP/1.1 client
//!
//! A small request/response client over any `SessionOps` transport. Used by
//! the integration tests to drive the server from the outside, including
//! over TLS.

use super::{
    chunked, Error, HttpRequest, HttpResponse, HttpSession, Method, ResponseParser, Result,
    SessionOps,
};

/// HTTP/1.1 client side of a connection
pub struct HttpClient<S: SessionOps> {
    session: HttpSession<S>,
    parser: ResponseParser,
}

impl<S: SessionOps> HttpClient<S> {
    /// Create a new HTTP client over a raw transport
    pub fn new(session: S) -> Self {
        HttpClient {
            session: HttpSession::new(session),
            parser: ResponseParser::new(),
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: std::time::Duration) {
        self.session.set_timeout(Some(timeout));
    }

    /// Send an HTTP request
    pub fn send_request(&mut self, request: &HttpRequest) -> Result<()> {
        self.session.write_all(&request.to_wire())?;
        self.session.flush()
    }

    /// Receive an HTTP response, decoding a chunked body if the response
    /// declares one
    pub fn receive_response(&mut self) -> Result<HttpResponse> {
        self.parser.reset();

        let mut response = loop {
            let mut temp = [0u8; 4096];
            let n = self.session.read(&mut temp)?;

            if n == 0 {
                return Err(Error::ConnectionClosed);
            }

            if let Some(response) = self.parser.parse(&temp[..n])? {
                break response;
            }
        };

        let is_chunked = response
            .headers()
            .get("Transfer-Encoding")
            .map(|v| v.eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        if is_chunked {
            let body = self.receive_chunked_body()?;
            response.set_body(body);
        }

        Ok(response)
    }

    /// Decode a chunked body, starting with bytes the head parser already
    /// buffered past the header section
    fn receive_chunked_body(&mut self) -> Result<Vec<u8>> {
        let mut decoder = chunked::ChunkedDecoder::new();
        let mut output = Vec::new();
        let mut input: Vec<u8> = self.parser.take_remaining();

        loop {
            let (consumed, complete) = decoder.decode(&input, &mut output)?;
            input.drain(..consumed);

            if complete {
                return Ok(output);
            }

            let mut temp = [0u8; 4096];
            let n = self.session.read(&mut temp)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            input.extend_from_slice(&temp[..n]);
        }
    }

    /// Send a simple GET request and wait for the response
    pub fn get(&mut self, uri: &str) -> Result<HttpResponse> {
        let request = HttpRequest::builder()
            .method(Method::Get)
            .uri(uri)
            .header("Host", "localhost")
            .build();

        self.send_request(&request)?;
        self.receive_response()
    }

    /// Send a POST request with a body and wait for the response
    pub fn post(&mut self, uri: &str, body: Vec<u8>) -> Result<HttpResponse> {
        let request = HttpRequest::builder()
            .method(Method::Post)
            .uri(uri)
            .header("Host", "localhost")
            .header("Content-Length", body.len().to_string())
            .body(body)
            .build();

        self.send_request(&request)?;
        self.receive_response()
    }

    /// Close the connection
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::FdSessionOps;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    #[test]
    fn test_send_request() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK")
                .unwrap();
            request
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut client = HttpClient::new(FdSessionOps::new(stream));

        let request = HttpRequest::builder()
            .method(Method::Get)
            .uri("/")
            .header("Host", "localhost")
            .build();
        client.send_request(&request).unwrap();

        let seen = handle.join().unwrap();
        assert!(seen.contains("GET / HTTP/1.1"));
        assert!(seen.contains("Host: localhost"));
    }

    #[test]
    fn test_receive_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 1024];
            stream.read(&mut buf).unwrap();

            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nHello",
                )
                .unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut client = HttpClient::new(FdSessionOps::new(stream));

        let response = client.get("/").unwrap();
        assert_eq!(response.status().code(), 200);
        assert_eq!(response.body(), b"Hello");
        assert_eq!(response.headers().get("Content-Type"), Some("text/plain"));

        handle.join().unwrap();
    }

    #[test]
    fn test_receive_chunked_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 1024];
            stream.read(&mut buf).unwrap();

            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHello\r\n6\r\n World\r\n0\r\n\r\n",
                )
                .unwrap();
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut client = HttpClient::new(FdSessionOps::new(stream));

        let response = client.get("/").unwrap();
        assert_eq!(response.status().code(), 200);
        assert_eq!(response.body(), b"Hello World");

        handle.join().unwrap();
    }
}
