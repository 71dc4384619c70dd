//! MIME encoding and decoding utilities.
//!
//! Supports Base64 (line-wrapped for bodies), Quoted-Printable, and RFC 2047
//! header encoding.

use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum line length for encoded bodies (RFC 2045).
const MAX_LINE_LENGTH: usize = 76;

/// Maximum length of a single RFC 2047 encoded word.
const MAX_ENCODED_WORD: usize = 75;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 split into CRLF-terminated lines of 76 characters.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let encoded = STANDARD.encode(data);
    let mut result = String::with_capacity(encoded.len() + encoded.len() / MAX_LINE_LENGTH * 2 + 2);
    let mut rest = encoded.as_str();
    while !rest.is_empty() {
        let (line, tail) = rest.split_at(rest.len().min(MAX_LINE_LENGTH));
        result.push_str(line);
        result.push_str("\r\n");
        rest = tail;
    }
    result
}

/// Decodes Base64 data, ignoring embedded whitespace.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(Into::into)
}

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Line breaks in the input are kept as hard CRLF breaks; long lines get
/// soft breaks. Trailing whitespace before a line break is encoded.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::new();
    let normalized = text.replace("\r\n", "\n");
    let mut lines = normalized.split('\n').peekable();

    while let Some(line) = lines.next() {
        let bytes = line.as_bytes();
        let mut line_length = 0;

        for (i, byte) in bytes.iter().enumerate() {
            let is_last = i + 1 == bytes.len();
            let mut token = String::with_capacity(3);
            match byte {
                b'!'..=b'<' | b'>'..=b'~' => token.push(*byte as char),
                b' ' | b'\t' if !is_last => token.push(*byte as char),
                _ => {
                    let _ = write!(token, "={byte:02X}");
                }
            }

            // Soft line break keeps every physical line within the limit
            if line_length + token.len() > MAX_LINE_LENGTH - 1 {
                result.push_str("=\r\n");
                line_length = 0;
            }
            result.push_str(&token);
            line_length += token.len();
        }

        if lines.peek().is_some() {
            result.push_str("\r\n");
        }
    }

    result
}

/// Decodes Quoted-Printable text (RFC 2045).
///
/// # Errors
///
/// Returns an error if the input contains invalid escape sequences.
pub fn decode_quoted_printable(text: &str) -> Result<String> {
    let mut result = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            result.push(bytes[i]);
            i += 1;
            continue;
        }

        match bytes.get(i + 1..i + 3) {
            Some(b"\r\n") => i += 3,
            Some([b'\n', ..]) => i += 2,
            Some(hex) => {
                let hex = std::str::from_utf8(hex)
                    .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
                let byte = u8::from_str_radix(hex, 16)
                    .map_err(|e| Error::InvalidEncoding(format!("Invalid hex: {e}")))?;
                result.push(byte);
                i += 3;
            }
            None if bytes.get(i + 1) == Some(&b'\n') => i += 2,
            None => {
                return Err(Error::InvalidEncoding(
                    "Incomplete escape sequence".to_string(),
                ));
            }
        }
    }

    String::from_utf8(result).map_err(Into::into)
}

/// Returns true if a header value can be written without RFC 2047 encoding.
#[must_use]
pub fn is_header_safe(text: &str) -> bool {
    text.chars()
        .all(|c| c.is_ascii() && !c.is_ascii_control() && c != '=' && c != '?')
}

/// Encodes a header value using RFC 2047 B-encoding.
///
/// Plain ASCII values are returned unchanged. Longer values are split into
/// several encoded words on character boundaries, separated by folding
/// whitespace, so that every word stays within 75 characters.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if is_header_safe(text) {
        return text.to_string();
    }

    // =?charset?B?...?= overhead, leaving the rest for base64 output
    let overhead = charset.len() + 7;
    let max_raw = (MAX_ENCODED_WORD - overhead) / 4 * 3;

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in text.chars() {
        if chunk.len() + ch.len_utf8() > max_raw {
            words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes())));
    }

    words.join("\r\n ")
}

/// Decodes an RFC 2047 encoded header value.
///
/// Adjacent encoded words separated only by folding whitespace are joined.
///
/// # Errors
///
/// Returns an error if an encoded word is malformed.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let is_encoded_word = |w: &&str| w.len() >= 4 && w.starts_with("=?") && w.ends_with("?=");
    if words.is_empty() || !words.iter().all(is_encoded_word) {
        return Ok(text.to_string());
    }

    let mut bytes = Vec::new();
    for word in words {
        let inner = &word[2..word.len() - 2];
        let parts: Vec<&str> = inner.split('?').collect();
        let [_, encoding, encoded_text] = parts.as_slice() else {
            return Err(Error::InvalidEncoding(
                "Invalid RFC 2047 format".to_string(),
            ));
        };

        match encoding.to_uppercase().as_str() {
            "B" => bytes.extend(decode_base64(encoded_text)?),
            "Q" => {
                let text_with_spaces = encoded_text.replace('_', " ");
                bytes.extend(decode_quoted_printable(&text_with_spaces)?.into_bytes());
            }
            other => {
                return Err(Error::InvalidEncoding(format!("Unknown encoding: {other}")));
            }
        }
    }

    String::from_utf8(bytes).map_err(Into::into)
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
    fn test_base64_encode_decode() {
        let data = b"Hello, World!";
        let encoded = encode_base64(data);
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ==");

        let decoded = decode_base64(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_base64_wrapped_line_length() {
        let data = vec![0xAB_u8; 200];
        let encoded = encode_base64_wrapped(&data);
        for line in encoded.split("\r\n").filter(|l| !l.is_empty()) {
            assert!(line.len() <= 76);
        }
        assert!(encoded.ends_with("\r\n"));
        assert_eq!(decode_base64(&encoded).unwrap(), data);
    }

    #[test]
    fn test_base64_wrapped_empty() {
        assert_eq!(encode_base64_wrapped(b""), "");
    }

    #[test]
    fn test_quoted_printable_encode() {
        let text = "Hello, World!";
        assert_eq!(encode_quoted_printable(text), "Hello, World!");

        let encoded = encode_quoted_printable("Héllo, Wørld!");
        assert!(encoded.contains("=C3=A9"));
    }

    #[test]
    fn test_quoted_printable_keeps_line_breaks() {
        let encoded = encode_quoted_printable("line one\nline two");
        assert_eq!(encoded, "line one\r\nline two");
    }

    #[test]
    fn test_quoted_printable_trailing_space() {
        let encoded = encode_quoted_printable("trailing \nnext");
        assert_eq!(encoded, "trailing=20\r\nnext");
    }

    #[test]
    fn test_quoted_printable_soft_breaks() {
        let long = "a".repeat(200);
        let encoded = encode_quoted_printable(&long);
        for line in encoded.split("\r\n") {
            assert!(line.len() <= 76);
        }
        assert_eq!(decode_quoted_printable(&encoded).unwrap(), long);
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable("Hello, World!").unwrap(), "Hello, World!");
        assert_eq!(decode_quoted_printable("H=C3=A9llo").unwrap(), "Héllo");
    }

    #[test]
    fn test_quoted_printable_soft_line_break() {
        let decoded = decode_quoted_printable("Hello=\r\nWorld").unwrap();
        assert_eq!(decoded, "HelloWorld");
    }

    #[test]
    fn test_quoted_printable_incomplete_escape() {
        assert!(decode_quoted_printable("abc=4").is_err());
    }

    #[test]
    fn test_rfc2047_encode() {
        assert_eq!(encode_rfc2047("Hello", "utf-8"), "Hello");

        let encoded = encode_rfc2047("Héllo", "utf-8");
        assert!(encoded.starts_with("=?utf-8?B?"));
        assert!(encoded.ends_with("?="));
    }

    #[test]
    fn test_rfc2047_long_value_is_split() {
        let text = "Réinitialisez votre mot de passe pour continuer à utiliser le compte";
        let encoded = encode_rfc2047(text, "utf-8");
        for word in encoded.split("\r\n ") {
            assert!(word.len() <= 75, "word too long: {word}");
        }
        assert_eq!(decode_rfc2047(&encoded).unwrap(), text);
    }

    #[test]
    fn test_rfc2047_decode() {
        assert_eq!(decode_rfc2047("Hello").unwrap(), "Hello");
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?=").unwrap(), "Héllo");
    }

    #[test]
    fn test_rfc2047_quoted_printable() {
        let decoded = decode_rfc2047("=?utf-8?Q?H=C3=A9llo?=").unwrap();
        assert_eq!(decoded, "Héllo");
    }
}
