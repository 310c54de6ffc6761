//! Server lifecycle integration tests
//!
//! Start/shutdown semantics: the all-workers-started guarantee of `start`,
//! per-worker release independence, shutdown ordering, and idempotence.

use portcullis::http::session::FdSessionOps;
use portcullis::http::{HttpClient, HttpResponse, Status};
use portcullis::server::{Command, Server, ServerConfig, TlsSettings};
use std::net::TcpStream;
use std::time::Duration;

fn start_server(workers: usize) -> Command {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let config = ServerConfig::builder().workers(workers).build();
    let server = Server::new(config, |_ctx| {
        Ok(HttpResponse::builder()
            .status(Status::OK)
            .body(b"ok".to_vec())
            .build())
    });
    server.start().unwrap()
}

fn get_ok(addr: std::net::SocketAddr) {
    let stream = TcpStream::connect(addr).unwrap();
    let mut client = HttpClient::new(FdSessionOps::new(stream));
    let response = client.get("/").unwrap();
    assert_eq!(response.status().code(), 200);
}

#[test]
fn test_start_returns_with_all_workers_accepting() {
    // No sleeps: if start() returned before the accept loops were up, the
    // immediate connect would hang or get dropped
    let command = start_server(4);
    assert_eq!(command.releasers().len(), 4);

    get_ok(command.addr());
    command.shutdown();
}

#[test]
fn test_releasing_one_worker_leaves_socket_open() {
    let command = start_server(2);

    command.releasers()[0].release();
    assert!(command.releasers()[0].is_released());
    assert!(!command.releasers()[1].is_released());

    // The shared socket stays open and the other worker still serves
    for _ in 0..3 {
        get_ok(command.addr());
    }

    command.shutdown();
}

#[test]
fn test_shutdown_closes_listeners() {
    let command = start_server(2);
    let addr = command.addr();

    get_ok(addr);
    command.shutdown();

    // All sockets are closed; new connections are refused
    let result = TcpStream::connect_timeout(&addr, Duration::from_millis(500));
    assert!(result.is_err());
}

#[test]
fn test_shutdown_twice_is_harmless() {
    let command = start_server(3);

    command.shutdown();
    command.shutdown();

    for releaser in command.releasers() {
        assert!(releaser.is_released());
    }
}

#[test]
fn test_shutdown_covers_both_pools() {
    let config = ServerConfig::builder()
        .tls(TlsSettings::new("127.0.0.1:0".parse().unwrap()))
        .workers(2)
        .build();
    let server = Server::new(config, |_ctx| {
        Ok(HttpResponse::builder().status(Status::OK).build())
    });
    let command = server.start().unwrap();

    // Two pools, two workers each
    assert_eq!(command.releasers().len(), 4);
    let plain_addr = command.addr();
    let tls_addr = command.tls_addr().unwrap();

    get_ok(plain_addr);
    command.shutdown();

    assert!(TcpStream::connect_timeout(&plain_addr, Duration::from_millis(500)).is_err());
    assert!(TcpStream::connect_timeout(&tls_addr, Duration::from_millis(500)).is_err());
}

#[test]
fn test_bind_failure_is_fatal() {
    let first = start_server(1);

    // Binding a second plaintext listener on the same port succeeds thanks
    // to reuse-port, so provoke the failure with an unbindable address
    let config = ServerConfig::builder()
        .addr("192.0.2.1:1".parse().unwrap())
        .build();
    let server = Server::new(config, |_ctx| {
        Ok(HttpResponse::builder().status(Status::OK).build())
    });
    assert!(server.start().is_err());

    first.shutdown();
}

#[test]
fn test_shutdown_does_not_abort_inflight_connection() {
    let command = start_server(1);
    let addr = command.addr();

    // A completed exchange proves the connection is accepted and owned by
    // a handler thread
    let stream = TcpStream::connect(addr).unwrap();
    let mut client = HttpClient::new(FdSessionOps::new(stream));
    let response = client.get("/first").unwrap();
    assert_eq!(response.status().code(), 200);

    // Request in flight on the accepted connection while we shut down
    let request = portcullis::http::HttpRequest::builder()
        .uri("/inflight")
        .header("Host", "localhost")
        .build();
    client.send_request(&request).unwrap();

    command.shutdown();

    // Shutdown only stops accepting; the in-flight exchange completes
    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);
}
