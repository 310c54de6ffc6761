//! Portcullis - embeddable HTTP/1.1 + HTTP/2 server core
//!
//! This crate provides the connection-acceptance and protocol-negotiation
//! layer of an HTTP server: multi-worker accept loops, plaintext and TLS
//! listeners, ALPN-driven codec selection, the cleartext h2c upgrade, and
//! coordinated graceful shutdown. The HTTP/1.1 and HTTP/2 codecs it
//! dispatches to live under [`http`].
//!
//! # Example
//!
//! ```no_run
//! use portcullis::http::{HttpResponse, Status, Version};
//! use portcullis::server::{Server, ServerConfig};
//!
//! let config = ServerConfig::builder()
//!     .addr("127.0.0.1:8080".parse().unwrap())
//!     .workers(4)
//!     .max_version(Version::Http2)
//!     .h2c_upgrade(true)
//!     .build();
//!
//! let server = Server::new(config, |ctx| {
//!     Ok(HttpResponse::builder()
//!         .status(Status::OK)
//!         .body(format!("hello {}", ctx.request.uri()).into_bytes())
//!         .build())
//! });
//!
//! let command = server.start().unwrap();
//! // ... serve until told otherwise ...
//! command.shutdown();
//! ```

pub mod http;
pub mod net;
pub mod server;
