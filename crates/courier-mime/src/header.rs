//! MIME header handling.

use crate::encoding::{decode_rfc2047, encode_rfc2047};
use crate::error::Result;
use std::fmt;

/// Ordered collection of email headers.
///
/// Lookups are case-insensitive; rendering keeps insertion order and the
/// name as it was first added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Encodes a header value using RFC 2047 if needed.
    #[must_use]
    pub fn encode_value(value: &str) -> String {
        encode_rfc2047(value, "utf-8")
    }

    /// Decodes a header value from RFC 2047 if encoded.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_value(value: &str) -> Result<String> {
        decode_rfc2047(value)
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_new() {
        let headers = Headers::new();
        assert!(headers.get("Subject").is_none());
        assert!(headers.to_string().is_empty());
    }

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain")); // Case insensitive
    }

    #[test]
    fn test_headers_display_keeps_order() {
        let mut headers = Headers::new();
        headers.add("To", "recipient@example.com");
        headers.add("From", "sender@example.com");

        assert_eq!(
            headers.to_string(),
            "To: recipient@example.com\r\nFrom: sender@example.com\r\n"
        );
    }

    #[test]
    fn test_encode_decode_value() {
        let encoded = Headers::encode_value("Grüße");
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert_eq!(Headers::decode_value(&encoded).unwrap(), "Grüße");
    }
}
