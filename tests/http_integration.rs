//! Plaintext HTTP/1.1 integration tests
//!
//! Drive a started server over real sockets: basic exchanges, keep-alive,
//! connection close semantics, chunked responses, error handler fallback,
//! and multi-worker accept.

use portcullis::http::session::FdSessionOps;
use portcullis::http::{Error, HttpClient, HttpResponse, Status};
use portcullis::server::{Command, Server, ServerConfig};
use std::net::TcpStream;
use std::thread;

fn start_echo_server(config: ServerConfig) -> Command {
    let server = Server::new(config, |ctx| {
        match ctx.request.uri() {
            "/fail" => Err(Error::Handler("deliberate failure".to_string())),
            "/chunked" => Ok(HttpResponse::builder()
                .status(Status::OK)
                .header("Transfer-Encoding", "chunked")
                .body(b"streamed body".to_vec())
                .build()),
            uri => Ok(HttpResponse::builder()
                .status(Status::OK)
                .header("Content-Type", "text/plain")
                .body(format!("{} {} via {}", ctx.request.method(), uri, ctx.scheme).into_bytes())
                .build()),
        }
    });
    server.start().unwrap()
}

fn connect(command: &Command) -> HttpClient<FdSessionOps> {
    let stream = TcpStream::connect(command.addr()).unwrap();
    HttpClient::new(FdSessionOps::new(stream))
}

#[test]
fn test_basic_get() {
    let command = start_echo_server(ServerConfig::builder().build());

    let mut client = connect(&command);
    let response = client.get("/hello").unwrap();

    assert_eq!(response.status().code(), 200);
    assert_eq!(response.body(), b"GET /hello via http");
    assert_eq!(
        response.headers().get("Content-Length"),
        Some("19")
    );

    command.shutdown();
}

#[test]
fn test_keep_alive_reuses_connection() {
    let command = start_echo_server(ServerConfig::builder().build());

    let mut client = connect(&command);
    for i in 0..5 {
        let uri = format!("/req{}", i);
        let response = client.get(&uri).unwrap();
        assert_eq!(response.status().code(), 200);
        assert_eq!(
            response.body(),
            format!("GET {} via http", uri).as_bytes()
        );
    }

    command.shutdown();
}

#[test]
fn test_connection_close_is_honored() {
    let command = start_echo_server(ServerConfig::builder().build());

    let mut client = connect(&command);
    let request = portcullis::http::HttpRequest::builder()
        .uri("/bye")
        .header("Host", "localhost")
        .header("Connection", "close")
        .build();
    client.send_request(&request).unwrap();
    let response = client.receive_response().unwrap();
    assert_eq!(response.status().code(), 200);

    // The server closes; the next read sees EOF
    let followup = client.receive_response();
    assert!(followup.is_err());

    command.shutdown();
}

#[test]
fn test_post_body_round_trip() {
    let command = {
        let server = Server::new(ServerConfig::builder().build(), |ctx| {
            Ok(HttpResponse::builder()
                .status(Status::OK)
                .body(ctx.request.body().to_vec())
                .build())
        });
        server.start().unwrap()
    };

    let mut client = connect(&command);
    let response = client.post("/echo", b"some payload".to_vec()).unwrap();
    assert_eq!(response.status().code(), 200);
    assert_eq!(response.body(), b"some payload");

    command.shutdown();
}

#[test]
fn test_chunked_response() {
    let command = start_echo_server(ServerConfig::builder().build());

    let mut client = connect(&command);
    let response = client.get("/chunked").unwrap();

    assert_eq!(response.status().code(), 200);
    assert_eq!(
        response.headers().get("Transfer-Encoding"),
        Some("chunked")
    );
    assert_eq!(response.body(), b"streamed body");

    command.shutdown();
}

#[test]
fn test_handler_error_becomes_500() {
    let command = start_echo_server(ServerConfig::builder().build());

    let mut client = connect(&command);
    let response = client.get("/fail").unwrap();
    assert_eq!(response.status().code(), 500);

    // The connection survives a failed exchange
    let response = client.get("/ok").unwrap();
    assert_eq!(response.status().code(), 200);

    command.shutdown();
}

#[test]
fn test_custom_error_handler() {
    let server = Server::with_error_handler(
        ServerConfig::builder().build(),
        |_ctx| Err(Error::Handler("nope".to_string())),
        |_peer, request, _error| {
            HttpResponse::builder()
                .status(Status::new(503).unwrap())
                .body(
                    format!("unavailable: {}", request.map(|r| r.uri()).unwrap_or("?"))
                        .into_bytes(),
                )
                .build()
        },
    );
    let command = server.start().unwrap();

    let mut client = connect(&command);
    let response = client.get("/thing").unwrap();
    assert_eq!(response.status().code(), 503);
    assert_eq!(response.body(), b"unavailable: /thing");

    command.shutdown();
}

#[test]
fn test_malformed_request_gets_400() {
    use std::io::{Read, Write};

    let command = start_echo_server(ServerConfig::builder().build());

    let mut stream = TcpStream::connect(command.addr()).unwrap();
    stream.write_all(b"THIS IS NOT HTTP\r\n\r\n").unwrap();

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).unwrap();
    let reply = String::from_utf8_lossy(&buf);
    assert!(reply.starts_with("HTTP/1.1 400 Bad Request"));

    // The listener is unaffected
    let mut client = connect(&command);
    assert_eq!(client.get("/still-up").unwrap().status().code(), 200);

    command.shutdown();
}

#[test]
fn test_many_workers_share_one_address() {
    let command = start_echo_server(ServerConfig::builder().workers(4).build());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let addr = command.addr();
            thread::spawn(move || {
                let stream = TcpStream::connect(addr).unwrap();
                let mut client = HttpClient::new(FdSessionOps::new(stream));
                let response = client.get(&format!("/parallel{}", i)).unwrap();
                assert_eq!(response.status().code(), 200);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    command.shutdown();
}
