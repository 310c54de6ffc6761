//! TLS configuration
//!
//! Builders for server and client TLS contexts. A built `TlsConfig` is
//! immutable and shared by every connection on a listener.

use openssl::ssl::{SslContextBuilder, SslMethod, SslVerifyMode, SslVersion};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// TLS protocol version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// The matching OpenSSL protocol constant
    fn openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Canonical version string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = TlsError;

    /// Accepts the common spellings, case-insensitively
    fn from_str(s: &str) -> Result<Self, TlsError> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(TlsError::InvalidVersion(s.to_string())),
        }
    }
}

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// TLS configuration (immutable after building)
#[derive(Clone)]
pub struct TlsConfig {
    pub(crate) ctx: openssl::ssl::SslContext,
    pub(crate) is_server: bool,
    pub(crate) servername: Option<String>,
}

impl TlsConfig {
    /// Start building a client configuration
    pub fn client() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Start building a server configuration
    pub fn server() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// Connect to a server with TLS (client-side)
    pub fn connect(&self, stream: std::net::TcpStream) -> Result<super::TlsSessionOps, TlsError> {
        if self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use server config for client connection".to_string(),
            ));
        }
        super::session::TlsSessionOps::connect(stream, self.clone())
    }

    /// Accept a client connection with TLS (server-side), bounding the
    /// handshake with a timeout
    pub fn accept(
        &self,
        stream: std::net::TcpStream,
        timeout: std::time::Duration,
    ) -> Result<super::TlsSessionOps, TlsError> {
        if !self.is_server {
            return Err(TlsError::InvalidConfig(
                "Cannot use client config for server accept".to_string(),
            ));
        }
        super::session::TlsSessionOps::accept(stream, self.clone(), timeout)
    }
}

/// Pin both ends of the negotiable protocol range to one version
fn pin_version(ctx: &mut SslContextBuilder, version: TlsVersion) {
    ctx.set_min_proto_version(Some(version.openssl_version()))
        .expect("Failed to set min proto version");
    ctx.set_max_proto_version(Some(version.openssl_version()))
        .expect("Failed to set max proto version");
}

/// Length-prefixed ALPN protocol list, as OpenSSL wants it
fn encode_alpn(protocols: &[&str]) -> Vec<u8> {
    let mut wire = Vec::new();
    for proto in protocols {
        wire.push(proto.len() as u8);
        wire.extend_from_slice(proto.as_bytes());
    }
    wire
}

/// Load a certificate and its private key from one PEM blob
fn load_pem(ctx: &mut SslContextBuilder, cert_pem: &[u8], what: &str) -> Result<(), TlsError> {
    use openssl::pkey::PKey;
    use openssl::x509::X509;

    let cert = X509::from_pem(cert_pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load {} certificate: {}", what, e)))?;
    ctx.set_certificate(&cert)?;

    let key = PKey::private_key_from_pem(cert_pem)
        .map_err(|e| TlsError::Certificate(format!("Failed to load {} private key: {}", what, e)))?;
    ctx.set_private_key(&key)?;

    Ok(())
}

/// Client configuration builder
pub struct ClientConfigBuilder {
    ctx: SslContextBuilder,
    servername: Option<String>,
}

impl ClientConfigBuilder {
    fn new() -> Self {
        let mut ctx =
            SslContextBuilder::new(SslMethod::tls_client()).expect("Failed to create SSL context");

        // Default: don't verify peer (test certificates are self-signed)
        ctx.set_verify(SslVerifyMode::NONE);

        ClientConfigBuilder {
            ctx,
            servername: None,
        }
    }

    /// Pin the TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        pin_version(&mut self.ctx, version);
        self
    }

    /// Set the ALPN protocols to offer, in preference order
    pub fn alpn(mut self, protocols: &[&str]) -> Result<Self, TlsError> {
        self.ctx.set_alpn_protos(&encode_alpn(protocols))?;
        Ok(self)
    }

    /// Set SNI servername
    pub fn servername(mut self, name: impl Into<String>) -> Self {
        self.servername = Some(name.into());
        self
    }

    /// Enable/disable peer certificate verification
    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.ctx.set_verify(if verify {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });
        self
    }

    /// Build the TLS configuration
    pub fn build(self) -> Result<TlsConfig, TlsError> {
        Ok(TlsConfig {
            ctx: self.ctx.build(),
            is_server: false,
            servername: self.servername,
        })
    }
}

/// Server configuration builder
pub struct ServerConfigBuilder {
    ctx: SslContextBuilder,
    has_cert: bool,
}

impl ServerConfigBuilder {
    fn new() -> Self {
        let ctx =
            SslContextBuilder::new(SslMethod::tls_server()).expect("Failed to create SSL context");

        ServerConfigBuilder {
            ctx,
            has_cert: false,
        }
    }

    /// Pin the TLS version (both min and max)
    pub fn version(mut self, version: TlsVersion) -> Self {
        pin_version(&mut self.ctx, version);
        self
    }

    /// Set the ALPN protocols the server is willing to select, in
    /// preference order
    pub fn alpn(mut self, protocols: &[&str]) -> Result<Self, TlsError> {
        let supported: Vec<Vec<u8>> = protocols.iter().map(|p| p.as_bytes().to_vec()).collect();

        // Walk the client's length-prefixed offer list in its order and
        // take the first protocol both sides speak
        self.ctx.set_alpn_select_callback(move |_ssl, offers| {
            let mut rest = offers;
            while let Some((&len, tail)) = rest.split_first() {
                let len = len as usize;
                if len > tail.len() {
                    break;
                }
                let offer = &tail[..len];
                if supported.iter().any(|p| p.as_slice() == offer) {
                    return Ok(offer);
                }
                rest = &tail[len..];
            }

            Err(openssl::ssl::AlpnError::NOACK)
        });

        Ok(self)
    }

    /// Load the server certificate and key from a PEM file
    pub fn cert_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, TlsError> {
        let mut cert_pem = Vec::new();
        File::open(path.as_ref())?.read_to_end(&mut cert_pem)?;

        load_pem(&mut self.ctx, &cert_pem, "server")?;
        self.has_cert = true;
        Ok(self)
    }

    /// Build the TLS configuration.
    ///
    /// Without an explicit certificate, the built-in self-signed
    /// certificate is used.
    pub fn build(mut self) -> Result<TlsConfig, TlsError> {
        if !self.has_cert {
            load_pem(
                &mut self.ctx,
                super::builtin_cert::BUILTIN_CERT.as_bytes(),
                "built-in",
            )?;
        }

        Ok(TlsConfig {
            ctx: self.ctx.build(),
            is_server: true,
            servername: None,
        })
    }
}
