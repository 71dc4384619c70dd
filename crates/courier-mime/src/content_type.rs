//! MIME content type handling.

use crate::error::{Error, Result};
use std::fmt;

/// Fallback for content that cannot be identified.
const OCTET_STREAM: (&str, &str) = ("application", "octet-stream");

/// Leading-byte signatures recognised by [`ContentType::sniff`].
const SIGNATURES: &[(&[u8], &str, &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "image", "png"),
    (b"\xff\xd8\xff", "image", "jpeg"),
    (b"GIF87a", "image", "gif"),
    (b"GIF89a", "image", "gif"),
    (b"%PDF-", "application", "pdf"),
    (b"PK\x03\x04", "application", "zip"),
    (b"\x00\x00\x01\x00", "image", "vnd.microsoft.icon"),
];

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters in insertion order (e.g., charset=utf-8, boundary=xxx).
    pub parameters: Vec<(String, String)>,
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: Vec::new(),
        }
    }

    /// Creates a text/plain content type.
    #[must_use]
    pub fn text_plain() -> Self {
        Self::new("text", "plain").with_parameter("charset", "utf-8")
    }

    /// Creates a text/html content type.
    #[must_use]
    pub fn text_html() -> Self {
        Self::new("text", "html").with_parameter("charset", "utf-8")
    }

    /// Creates a multipart/mixed content type with boundary.
    #[must_use]
    pub fn multipart_mixed(boundary: impl Into<String>) -> Self {
        Self::new("multipart", "mixed").with_parameter("boundary", boundary)
    }

    /// Creates a multipart/alternative content type with boundary.
    #[must_use]
    pub fn multipart_alternative(boundary: impl Into<String>) -> Self {
        Self::new("multipart", "alternative").with_parameter("boundary", boundary)
    }

    /// Creates an application/octet-stream content type.
    #[must_use]
    pub fn octet_stream() -> Self {
        Self::new(OCTET_STREAM.0, OCTET_STREAM.1)
    }

    /// Adds or replaces a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self
            .parameters
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((key, value)),
        }
        self
    }

    /// Returns a parameter value by name.
    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameter("charset")
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameter("boundary")
    }

    /// Returns true if the type/subtype pair matches, ignoring case.
    #[must_use]
    pub fn is(&self, main_type: &str, sub_type: &str) -> bool {
        self.main_type.eq_ignore_ascii_case(main_type)
            && self.sub_type.eq_ignore_ascii_case(sub_type)
    }

    /// Guesses the content type of an opaque stream.
    ///
    /// `head` is the first bytes of the content. Known magic numbers win;
    /// otherwise the filename extension decides, and anything unrecognised is
    /// `application/octet-stream`.
    #[must_use]
    pub fn sniff(head: &[u8], filename: &str) -> Self {
        if let Some((_, main, sub)) = SIGNATURES
            .iter()
            .find(|(magic, _, _)| head.starts_with(magic))
        {
            return Self::new(*main, *sub);
        }
        if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
            return Self::new("image", "webp");
        }

        mime_guess::from_path(filename).first().map_or_else(Self::octet_stream, |mime| {
            Self::new(mime.type_().as_str(), mime.subtype().as_str())
        })
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2=value2`
    ///
    /// # Errors
    ///
    /// Returns an error if the format is invalid.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split(';');

        let type_str = parts
            .next()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidContentType("Empty content type".to_string()))?;

        let (main_type, sub_type) = type_str
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(format!("Missing subtype: {type_str}")))?;

        let mut content_type = Self::new(
            main_type.trim().to_lowercase(),
            sub_type.trim().to_lowercase(),
        );

        for param in parts {
            if let Some((key, value)) = param.trim().split_once('=') {
                content_type =
                    content_type.with_parameter(key.trim().to_lowercase(), unquote(value.trim()));
            }
        }

        Ok(content_type)
    }
}

/// Strips surrounding quotes and resolves `\` escapes of a quoted string.
fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let main = &self.main_type;
        let sub = &self.sub_type;
        write!(f, "{main}/{sub}")?;

        for (key, value) in &self.parameters {
            // Quote value if it contains special characters
            if value.is_empty()
                || value.contains(|c: char| c.is_whitespace() || "()<>@,;:\\\"/[]?=".contains(c))
            {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "; {key}=\"{escaped}\"")?;
            } else {
                write!(f, "; {key}={value}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_new() {
        let ct = ContentType::new("text", "plain");
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "plain");
        assert!(ct.parameters.is_empty());
    }

    #[test]
    fn test_text_plain() {
        let ct = ContentType::text_plain();
        assert!(ct.is("text", "plain"));
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_multipart_mixed() {
        let ct = ContentType::multipart_mixed("boundary123");
        assert!(ct.is("multipart", "mixed"));
        assert_eq!(ct.boundary(), Some("boundary123"));
    }

    #[test]
    fn test_content_type_parse() {
        let ct = ContentType::parse("text/plain; charset=utf-8").unwrap();
        assert!(ct.is("text", "plain"));
        assert_eq!(ct.charset(), Some("utf-8"));
    }

    #[test]
    fn test_content_type_parse_quoted() {
        let ct = ContentType::parse("multipart/mixed; boundary=\"----=_Part_123\"").unwrap();
        assert!(ct.is("multipart", "mixed"));
        assert_eq!(ct.boundary(), Some("----=_Part_123"));
    }

    #[test]
    fn test_content_type_parse_missing_subtype() {
        assert!(ContentType::parse("text").is_err());
        assert!(ContentType::parse("").is_err());
    }

    #[test]
    fn test_content_type_display() {
        assert_eq!(ContentType::text_plain().to_string(), "text/plain; charset=utf-8");
        assert_eq!(
            ContentType::multipart_alternative("=_alt").to_string(),
            "multipart/alternative; boundary=\"=_alt\""
        );
    }

    #[test]
    fn test_content_type_with_parameter() {
        let ct = ContentType::new("text", "plain")
            .with_parameter("charset", "iso-8859-1")
            .with_parameter("format", "flowed")
            .with_parameter("charset", "utf-8");

        assert_eq!(ct.charset(), Some("utf-8"));
        assert_eq!(ct.parameter("format"), Some("flowed"));
        assert_eq!(ct.parameters.len(), 2);
    }

    #[test]
    fn test_sniff_magic_beats_extension() {
        let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
        assert!(ContentType::sniff(png, "logo.bin").is("image", "png"));
        assert!(ContentType::sniff(b"%PDF-1.7\n", "terms.txt").is("application", "pdf"));
        assert!(ContentType::sniff(b"RIFF\0\0\0\0WEBPVP8 ", "x").is("image", "webp"));
    }

    #[test]
    fn test_sniff_falls_back_to_extension() {
        assert!(ContentType::sniff(b"<svg xmlns", "logo.svg").is("image", "svg+xml"));
        assert!(ContentType::sniff(b"plain words", "notes.txt").is("text", "plain"));
    }

    #[test]
    fn test_sniff_unknown_is_octet_stream() {
        assert_eq!(ContentType::sniff(b"\x01\x02", "blob"), ContentType::octet_stream());
    }

    #[test]
    fn test_quoted_parameter_round_trip() {
        let ct = ContentType::new("text", "plain").with_parameter("name", r#"a\b "c".txt"#);
        let rendered = ct.to_string();
        assert_eq!(rendered, r#"text/plain; name="a\\b \"c\".txt""#);
        assert_eq!(
            ContentType::parse(&rendered).unwrap().parameter("name"),
            Some(r#"a\b "c".txt"#)
        );
    }
}
