//! Protocol scheme classification
//!
//! A connection is either plaintext (`http`) or encrypted (`https`); every
//! listener and every per-connection context carries exactly one of the two.
//! The type is a pure value: resolution from URIs, strings, and well-known
//! ports has no side effects.

use super::{Error, Result};
use std::fmt;

/// Plaintext vs. encrypted classification of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Cleartext HTTP
    Http,
    /// HTTP over TLS
    Https,
}

impl Scheme {
    /// Resolve a scheme from a URI or bare scheme string.
    ///
    /// An absent scheme defaults to `Http`. Any scheme other than `http`
    /// or `https` is an `UnsupportedScheme` error; callers decide whether
    /// that is fatal.
    pub fn resolve(input: &str) -> Result<Scheme> {
        let token = match input.find("://") {
            Some(pos) => &input[..pos],
            // A path or empty string carries no scheme at all
            None if input.is_empty() || input.starts_with('/') => "",
            None => input,
        };

        match token {
            "" | "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }

    /// Parse a scheme from its exact string form
    pub fn from_str(s: &str) -> Result<Scheme> {
        match s {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }

    /// The scheme's string form; exact inverse of [`Scheme::from_str`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// The scheme's well-known port
    pub fn port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// Classify a well-known port; unknown ports are `None`, never an error
    pub fn from_port(port: u16) -> Option<Scheme> {
        match port {
            80 => Some(Scheme::Http),
            443 => Some(Scheme::Https),
            _ => None,
        }
    }

    /// Whether the scheme is encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
