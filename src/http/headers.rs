//! HTTP headers handling
//!
//! An insertion-ordered header collection with case-insensitive lookups,
//! multiple values per name, and comma-separated token matching (used for
//! `Connection` header inspection during protocol negotiation).

use super::{Error, Result, CRLF, MAX_HEADERS};
use std::fmt;

/// HTTP headers collection
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty collection
    pub fn new() -> Self {
        Headers::default()
    }

    /// Add a header.
    ///
    /// A repeated name adds another value rather than replacing the first.
    /// Insertions beyond `MAX_HEADERS` are silently dropped.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        if self.entries.len() < MAX_HEADERS {
            self.entries.push((name.into(), value.into()));
        }
    }

    /// First value for `name`, compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Whether any header has this name
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any value of `name`, read as a comma-separated token list,
    /// contains `token` (tokens trimmed, compared case-insensitively).
    ///
    /// `Connection: keep-alive, Upgrade` therefore has the token `upgrade`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// Remove every header named `name`; returns how many were dropped
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All headers in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Serialize as `Name: value` lines plus the blank line ending the
    /// header section
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        for (name, value) in self.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }
        buf.extend_from_slice(CRLF.as_bytes());
    }

    /// Split a `Name: value` line into its components
    pub fn parse_header_line(line: &str) -> Result<(String, String)> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidHeader(format!("No colon in header: {}", line)))?;

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidHeader("Empty header name".to_string()));
        }

        Ok((name.to_string(), value.trim().to_string()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{}: {}", name, value)?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");
        headers.insert("Content-Length", "42");

        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(headers.get("Content-Length"), Some("42"));
        assert_eq!(headers.get("Missing"), None);
    }

    #[test]
    fn test_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/html");

        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert!(headers.contains("cOnTeNt-TyPe"));
    }

    #[test]
    fn test_multiple_values() {
        let mut headers = Headers::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");

        assert_eq!(headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.get("Set-Cookie"), Some("a=1"));
    }

    #[test]
    fn test_has_token() {
        let mut headers = Headers::new();
        headers.insert("Connection", "keep-alive, Upgrade");

        assert!(headers.has_token("Connection", "upgrade"));
        assert!(headers.has_token("connection", "Keep-Alive"));
        assert!(!headers.has_token("Connection", "close"));
        assert!(!headers.has_token("Upgrade", "h2c"));
    }

    #[test]
    fn test_has_token_across_repeated_headers() {
        let mut headers = Headers::new();
        headers.insert("Connection", "keep-alive");
        headers.insert("Connection", "Upgrade");

        assert!(headers.has_token("Connection", "upgrade"));
    }

    #[test]
    fn test_has_token_trims_whitespace() {
        let mut headers = Headers::new();
        headers.insert("Connection", "  upgrade  ,close");

        assert!(headers.has_token("Connection", "upgrade"));
        assert!(headers.has_token("Connection", "close"));
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.insert("X-Remove", "value1");
        headers.insert("X-Keep", "value2");
        headers.insert("X-Remove", "value3");

        assert_eq!(headers.remove("x-remove"), 2);
        assert_eq!(headers.get("X-Remove"), None);
        assert_eq!(headers.get("X-Keep"), Some("value2"));
    }

    #[test]
    fn test_parse_header_line() {
        let (name, value) = Headers::parse_header_line("Content-Type: text/html").unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/html");

        // The value may itself contain colons
        let (_, value) = Headers::parse_header_line("Host: localhost:8080").unwrap();
        assert_eq!(value, "localhost:8080");

        assert!(Headers::parse_header_line("Invalid").is_err());
        assert!(Headers::parse_header_line(": value").is_err());
    }

    #[test]
    fn test_write_to_ends_header_section() {
        let mut headers = Headers::new();
        headers.insert("Host", "localhost");

        let mut buf = Vec::new();
        headers.write_to(&mut buf);
        assert_eq!(buf, b"Host: localhost\r\n\r\n");
    }

    #[test]
    fn test_max_headers() {
        let mut headers = Headers::new();
        for i in 0..MAX_HEADERS + 10 {
            headers.insert(format!("Header-{}", i), "value");
        }
        assert_eq!(headers.len(), MAX_HEADERS);
    }
}
