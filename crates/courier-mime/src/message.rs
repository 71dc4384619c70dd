//! MIME message structure and rendering.

use crate::content_type::ContentType;
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;
use std::fmt;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit, // Default (includes "7bit")
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Body of a part: encoded bytes or nested parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Leaf content, already transfer-encoded.
    Leaf(Vec<u8>),
    /// Multipart container.
    Multipart {
        /// Boundary delimiting the child parts.
        boundary: String,
        /// Child parts in order.
        parts: Vec<Part>,
    },
}

/// MIME message part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    /// Part body.
    pub body: Body,
}

impl Part {
    /// Creates a new part.
    #[must_use]
    pub const fn new(headers: Headers, body: Body) -> Self {
        Self { headers, body }
    }

    /// Gets the content type.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.headers
            .get("content-type")
            .map_or_else(|| Ok(ContentType::text_plain()), ContentType::parse)
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Returns the child parts of a multipart, or an empty slice.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        match &self.body {
            Body::Multipart { parts, .. } => parts,
            Body::Leaf(_) => &[],
        }
    }

    /// Returns true if the part is marked `Content-Disposition: attachment`.
    #[must_use]
    pub fn is_attachment(&self) -> bool {
        self.headers
            .get("content-disposition")
            .and_then(|d| d.split(';').next())
            .is_some_and(|d| d.trim().eq_ignore_ascii_case("attachment"))
    }

    /// Returns the filename from the Content-Disposition header.
    #[must_use]
    pub fn filename(&self) -> Option<String> {
        let disposition = self.headers.get("content-disposition")?;
        disposition.split(';').skip(1).find_map(|param| {
            let (key, value) = param.trim().split_once('=')?;
            match key.trim().to_lowercase().as_str() {
                "filename" => Some(value.trim().trim_matches('"').replace("\\\"", "\"")),
                "filename*" => {
                    let (_, encoded) = value.trim().split_once("''")?;
                    percent_decode(encoded)
                }
                _ => None,
            }
        })
    }

    /// Decodes a leaf body according to the transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if this is a multipart or decoding fails.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        let Body::Leaf(body) = &self.body else {
            return Err(Error::InvalidEncoding(
                "Multipart bodies have no single content".to_string(),
            ));
        };

        match self.transfer_encoding() {
            TransferEncoding::Base64 => decode_base64(&String::from_utf8_lossy(body)),
            TransferEncoding::QuotedPrintable => {
                let decoded = decode_quoted_printable(&String::from_utf8_lossy(body))?;
                Ok(decoded.into_bytes())
            }
            _ => Ok(body.clone()),
        }
    }

    /// Gets the decoded body as a string.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding or UTF-8 conversion fails.
    pub fn body_text(&self) -> Result<String> {
        let decoded = self.decode_body()?;
        String::from_utf8(decoded).map_err(Into::into)
    }

    /// Writes the part (headers, blank line, body) to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.headers.to_string().as_bytes());
        out.extend_from_slice(b"\r\n");
        write_body(&self.body, out);
    }
}

fn write_body(body: &Body, out: &mut Vec<u8>) {
    match body {
        Body::Leaf(bytes) => out.extend_from_slice(bytes),
        Body::Multipart { boundary, parts } => {
            for part in parts {
                out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                part.write_to(out);
                out.extend_from_slice(b"\r\n");
            }
            out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
        }
    }
}

fn percent_decode(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = std::str::from_utf8(bytes.get(i + 1..i + 3)?).ok()?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

/// Complete outgoing message: top-level headers, body and envelope sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Top-level part (message headers and body).
    pub root: Part,
    /// Address from the From header.
    pub sender: String,
    /// Transport-level bounce address, when it differs from `sender`.
    pub envelope_from: Option<String>,
}

impl Message {
    /// Gets the From header.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.root.headers.get("from")
    }

    /// Gets the Reply-To header.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.root.headers.get("reply-to")
    }

    /// Gets the To header.
    #[must_use]
    pub fn to(&self) -> Option<&str> {
        self.root.headers.get("to")
    }

    /// Gets the Subject header (possibly RFC 2047 encoded).
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.root.headers.get("subject")
    }

    /// Gets the Date header.
    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.root.headers.get("date")
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.root.headers.get("message-id")
    }

    /// Address handed to `MAIL FROM`: the envelope sender if set, else From.
    #[must_use]
    pub fn envelope_sender(&self) -> &str {
        self.envelope_from.as_deref().unwrap_or(&self.sender)
    }

    /// Gets the content type.
    ///
    /// # Errors
    ///
    /// Returns an error if content type header is invalid.
    pub fn content_type(&self) -> Result<ContentType> {
        self.root.content_type()
    }

    /// Returns the top-level parts.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        self.root.parts()
    }

    /// Returns the first multipart/alternative part, if any.
    #[must_use]
    pub fn alternative(&self) -> Option<&Part> {
        self.parts().iter().find(|part| {
            part.content_type()
                .is_ok_and(|ct| ct.is("multipart", "alternative"))
        })
    }

    /// Returns all parts marked as attachments, in order.
    #[must_use]
    pub fn attachments(&self) -> Vec<&Part> {
        self.parts().iter().filter(|p| p.is_attachment()).collect()
    }

    /// Finds the first text/plain body in the alternative part.
    ///
    /// # Errors
    ///
    /// Returns an error if no text part is found or decoding fails.
    pub fn text_part(&self) -> Result<String> {
        self.find_alternative("plain")
    }

    /// Finds the first text/html body in the alternative part.
    ///
    /// # Errors
    ///
    /// Returns an error if no HTML part is found or decoding fails.
    pub fn html_part(&self) -> Result<String> {
        self.find_alternative("html")
    }

    fn find_alternative(&self, sub_type: &str) -> Result<String> {
        let parts = self.alternative().map(Part::parts).unwrap_or_default();
        for part in parts {
            if part.content_type()?.is("text", sub_type) {
                return part.body_text();
            }
        }
        Err(Error::MissingHeader(format!("text/{sub_type} part")))
    }

    /// Renders the message as RFC 5322 bytes with CRLF line endings.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.root.write_to(&mut out);
        out
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

    fn leaf(content_type: &str, encoding: &str, body: &[u8]) -> Part {
        let mut headers = Headers::new();
        headers.add("Content-Type", content_type);
        headers.add("Content-Transfer-Encoding", encoding);
        Part::new(headers, Body::Leaf(body.to_vec()))
    }

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::SevenBit);
        assert_eq!(TransferEncoding::parse("base64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
    }

    #[test]
    fn test_part_body_text_quoted_printable() {
        let part = leaf("text/plain; charset=utf-8", "quoted-printable", b"H=C3=A9llo");
        assert_eq!(part.body_text().unwrap(), "Héllo");
    }

    #[test]
    fn test_part_decode_base64() {
        let part = leaf("image/png", "base64", b"AAEC\r\nAw==\r\n");
        assert_eq!(part.decode_body().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_multipart_has_no_single_body() {
        let part = Part::new(
            Headers::new(),
            Body::Multipart {
                boundary: "b".into(),
                parts: vec![],
            },
        );
        assert!(part.decode_body().is_err());
    }

    #[test]
    fn test_filename_plain_and_extended() {
        let mut part = leaf("image/png", "base64", b"");
        part.headers
            .add("Content-Disposition", "attachment; filename=\"logo.png\"");
        assert!(part.is_attachment());
        assert_eq!(part.filename().as_deref(), Some("logo.png"));

        let mut part = leaf("application/pdf", "base64", b"");
        part.headers.add(
            "Content-Disposition",
            "attachment; filename*=utf-8''conditions-g%C3%A9n%C3%A9rales.pdf",
        );
        assert_eq!(
            part.filename().as_deref(),
            Some("conditions-générales.pdf")
        );
    }

    #[test]
    fn test_write_multipart() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "multipart/mixed; boundary=outer");
        let root = Part::new(
            headers,
            Body::Multipart {
                boundary: "outer".into(),
                parts: vec![leaf("text/plain", "7bit", b"Part 1")],
            },
        );

        let mut out = Vec::new();
        root.write_to(&mut out);
        let rendered = String::from_utf8(out).unwrap();
        assert_eq!(
            rendered,
            concat!(
                "Content-Type: multipart/mixed; boundary=outer\r\n",
                "\r\n",
                "--outer\r\n",
                "Content-Type: text/plain\r\n",
                "Content-Transfer-Encoding: 7bit\r\n",
                "\r\n",
                "Part 1\r\n",
                "--outer--\r\n",
            )
        );
    }
}
