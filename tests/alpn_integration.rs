//! TLS + ALPN integration tests
//!
//! One server instance, two protocols: a client that negotiates `h2` is
//! served by the HTTP/2 codec, one that negotiates `http/1.1` by the
//! HTTP/1.1 codec, both over the same TLS listener and configuration.

use portcullis::http::h2::H2Client;
use portcullis::http::tls::{TlsConfig, TlsSessionOps};
use portcullis::http::{HttpClient, HttpResponse, Status, Version};
use portcullis::server::{Command, Server, ServerConfig, TlsSettings};
use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

fn start_tls_server(max_version: Version) -> Command {
    let config = ServerConfig::builder()
        .max_version(max_version)
        .tls(TlsSettings::new("127.0.0.1:0".parse().unwrap()))
        .accept_timeout(Duration::from_secs(2))
        .build();
    let server = Server::new(config, |ctx| {
        Ok(HttpResponse::builder()
            .status(Status::OK)
            .header("X-Scheme", ctx.scheme.as_str())
            .header("X-Served-Version", ctx.request.version().as_str())
            .body(format!("hello {}", ctx.request.uri()).into_bytes())
            .build())
    });
    server.start().unwrap()
}

fn tls_connect(command: &Command, alpn: &[&str]) -> TlsSessionOps {
    let tls_addr = command.tls_addr().expect("server has a TLS listener");
    let client_config = TlsConfig::client()
        .alpn(alpn)
        .unwrap()
        .verify_peer(false)
        .build()
        .unwrap();

    let stream = TcpStream::connect(tls_addr).unwrap();
    client_config.connect(stream).unwrap()
}

#[test]
fn test_alpn_h2_is_served_by_http2() {
    let command = start_tls_server(Version::Http2);

    let tls = tls_connect(&command, &["h2"]);
    assert_eq!(tls.selected_alpn(), Some(b"h2".to_vec()));

    let mut client = H2Client::new(tls).unwrap();
    let response = client.get("/h2-over-tls").unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.header("x-scheme"), Some("https"));
    assert_eq!(response.header("x-served-version"), Some("HTTP/2.0"));
    assert_eq!(response.body(), b"hello /h2-over-tls");

    command.shutdown();
}

#[test]
fn test_alpn_http11_is_served_by_http1() {
    let command = start_tls_server(Version::Http2);

    let tls = tls_connect(&command, &["http/1.1"]);
    assert_eq!(tls.selected_alpn(), Some(b"http/1.1".to_vec()));

    let mut client = HttpClient::new(tls);
    let response = client.get("/h1-over-tls").unwrap();

    assert_eq!(response.status().code(), 200);
    assert_eq!(response.headers().get("X-Scheme"), Some("https"));
    assert_eq!(response.headers().get("X-Served-Version"), Some("HTTP/1.1"));
    assert_eq!(response.body(), b"hello /h1-over-tls");

    command.shutdown();
}

#[test]
fn test_same_server_serves_both_protocols() {
    let command = start_tls_server(Version::Http2);

    let mut h2_client = H2Client::new(tls_connect(&command, &["h2", "http/1.1"])).unwrap();
    let h2_response = h2_client.get("/both").unwrap();
    assert_eq!(h2_response.status(), 200);

    let mut h1_client = HttpClient::new(tls_connect(&command, &["http/1.1"]));
    let h1_response = h1_client.get("/both").unwrap();
    assert_eq!(h1_response.status().code(), 200);

    command.shutdown();
}

#[test]
fn test_client_without_alpn_gets_http1() {
    let command = start_tls_server(Version::Http2);

    let tls_addr = command.tls_addr().unwrap();
    let client_config = TlsConfig::client().verify_peer(false).build().unwrap();
    let tls = client_config
        .connect(TcpStream::connect(tls_addr).unwrap())
        .unwrap();
    assert_eq!(tls.selected_alpn(), None);

    let mut client = HttpClient::new(tls);
    let response = client.get("/no-alpn").unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.headers().get("X-Served-Version"), Some("HTTP/1.1"));

    command.shutdown();
}

#[test]
fn test_h1_capped_server_does_not_offer_h2() {
    let command = start_tls_server(Version::Http11);

    // The client offers both; the server's advertisement is capped, so
    // negotiation lands on http/1.1
    let tls = tls_connect(&command, &["h2", "http/1.1"]);
    assert_eq!(tls.selected_alpn(), Some(b"http/1.1".to_vec()));

    let mut client = HttpClient::new(tls);
    let response = client.get("/capped").unwrap();
    assert_eq!(response.status().code(), 200);

    command.shutdown();
}

#[test]
fn test_handshake_failure_does_not_poison_the_listener() {
    let command = start_tls_server(Version::Http2);
    let tls_addr = command.tls_addr().unwrap();

    // Not a ClientHello; the handshake fails and the connection is dropped
    {
        let mut garbage = TcpStream::connect(tls_addr).unwrap();
        let _ = garbage.write_all(b"GET / HTTP/1.1\r\n\r\n");
    }

    // The listener keeps serving proper TLS clients
    let mut client = HttpClient::new(tls_connect(&command, &["http/1.1"]));
    let response = client.get("/after-garbage").unwrap();
    assert_eq!(response.status().code(), 200);

    command.shutdown();
}

#[test]
fn test_plaintext_listener_still_works_alongside_tls() {
    let command = start_tls_server(Version::Http2);

    let stream = TcpStream::connect(command.addr()).unwrap();
    let mut client = HttpClient::new(portcullis::http::session::FdSessionOps::new(stream));
    let response = client.get("/plain").unwrap();

    assert_eq!(response.status().code(), 200);
    assert_eq!(response.headers().get("X-Scheme"), Some("http"));

    command.shutdown();
}
