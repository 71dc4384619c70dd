//! Builder for outgoing `multipart/mixed` messages.
//!
//! The generated structure is always:
//!
//! ```text
//! multipart/mixed
//! ├── multipart/alternative
//! │   ├── text/plain; charset=utf-8   (when a text body is set)
//! │   └── text/html; charset=utf-8    (when an HTML body is set)
//! ├── attachment 1
//! └── attachment N
//! ```
//!
//! Mail clients render the last alternative they understand, so the HTML
//! part always follows the plain text part.

use crate::address::Mailbox;
use crate::content_type::ContentType;
use crate::encoding::{encode_base64_wrapped, encode_quoted_printable};
use crate::error::{Error, Result};
use crate::header::Headers;
use crate::message::{Body, Message, Part, TransferEncoding};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::io::Read;

/// Binary attachment with its filename and detected content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Filename presented to the recipient.
    pub filename: String,
    /// Content type of the data.
    pub content_type: ContentType,
    /// Raw (unencoded) content.
    pub data: Vec<u8>,
}

impl Attachment {
    /// Creates an attachment from in-memory data.
    #[must_use]
    pub fn new(filename: impl Into<String>, content_type: ContentType, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data,
        }
    }

    /// Creates an attachment by reading `reader` to the end.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn from_reader(
        filename: impl Into<String>,
        content_type: ContentType,
        mut reader: impl Read,
    ) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Ok(Self::new(filename, content_type, data))
    }

    fn into_part(self) -> Part {
        let mut headers = Headers::new();
        let (key, value) = filename_parameter("name", &self.filename);
        headers.add(
            "Content-Type",
            self.content_type.with_parameter(key, value).to_string(),
        );
        headers.add("Content-Transfer-Encoding", TransferEncoding::Base64.to_string());
        headers.add(
            "Content-Disposition",
            format!("attachment; {}", render_filename("filename", &self.filename)),
        );
        Part::new(headers, Body::Leaf(encode_base64_wrapped(&self.data).into_bytes()))
    }
}

/// Builder for a `multipart/mixed` message with an alternative body.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<Mailbox>,
    reply_to: Option<Mailbox>,
    envelope_from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
    date: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the From mailbox. Reply-To defaults to it.
    #[must_use]
    pub fn from(mut self, from: Mailbox) -> Self {
        self.from = Some(from);
        self
    }

    /// Sets an explicit Reply-To mailbox.
    #[must_use]
    pub fn reply_to(mut self, reply_to: Mailbox) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Sets the envelope sender used for bounces instead of the From address.
    #[must_use]
    pub fn envelope_from(mut self, address: impl Into<String>) -> Self {
        self.envelope_from = Some(address.into());
        self
    }

    /// Sets the To header verbatim.
    ///
    /// The value is free text: display-name formatting is up to the caller
    /// and it is not used to pick SMTP recipients.
    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the plain text body.
    #[must_use]
    pub fn text_body(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Sets the HTML body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }

    /// Appends an attachment.
    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Overrides the Date header (defaults to the time of [`build`](Self::build)).
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeader`] without a From mailbox or To header,
    /// [`Error::InvalidAddress`] for a blank To header and
    /// [`Error::InvalidHeader`] if the To header contains line breaks.
    pub fn build(self) -> Result<Message> {
        let from = self
            .from
            .ok_or_else(|| Error::MissingHeader("From".to_string()))?;
        let to = self
            .to
            .ok_or_else(|| Error::MissingHeader("To".to_string()))?;
        if to.trim().is_empty() {
            return Err(Error::InvalidAddress("Please provide a valid address".into()));
        }
        if to.contains(['\r', '\n']) {
            return Err(Error::InvalidHeader(format!("To header contains a line break: {to:?}")));
        }

        let reply_to = self.reply_to.as_ref().unwrap_or(&from);
        let date = self.date.unwrap_or_else(Utc::now);

        let mut headers = Headers::new();
        headers.add("Date", date.to_rfc2822());
        headers.add("From", from.to_string());
        headers.add("Reply-To", reply_to.to_string());
        headers.add("To", to);
        headers.add("Message-ID", message_id(&from, date));
        headers.add(
            "Subject",
            Headers::encode_value(self.subject.as_deref().unwrap_or_default()),
        );
        headers.add("MIME-Version", "1.0");

        let alternative = alternative_part(self.text.as_deref(), self.html.as_deref());
        let mut parts = Vec::with_capacity(1 + self.attachments.len());
        parts.push(alternative);
        parts.extend(self.attachments.into_iter().map(Attachment::into_part));

        let boundary = new_boundary("mixed");
        headers.add(
            "Content-Type",
            ContentType::multipart_mixed(boundary.clone()).to_string(),
        );

        Ok(Message {
            root: Part::new(headers, Body::Multipart { boundary, parts }),
            sender: from.address,
            envelope_from: self.envelope_from,
        })
    }
}

fn alternative_part(text: Option<&str>, html: Option<&str>) -> Part {
    let mut parts = Vec::with_capacity(2);
    if let Some(text) = text {
        parts.push(text_part(ContentType::text_plain(), text));
    }
    if let Some(html) = html {
        parts.push(text_part(ContentType::text_html(), html));
    }

    let boundary = new_boundary("alt");
    let mut headers = Headers::new();
    headers.add(
        "Content-Type",
        ContentType::multipart_alternative(boundary.clone()).to_string(),
    );
    Part::new(headers, Body::Multipart { boundary, parts })
}

fn text_part(content_type: ContentType, body: &str) -> Part {
    let mut headers = Headers::new();
    headers.add("Content-Type", content_type.to_string());
    headers.add(
        "Content-Transfer-Encoding",
        TransferEncoding::QuotedPrintable.to_string(),
    );
    Part::new(headers, Body::Leaf(encode_quoted_printable(body).into_bytes()))
}

/// "=_" never occurs in base64 or quoted-printable output.
fn new_boundary(kind: &str) -> String {
    format!("=_{kind}_{}", uuid::Uuid::new_v4().simple())
}

fn message_id(from: &Mailbox, date: DateTime<Utc>) -> String {
    format!(
        "<{}.{}@{}>",
        date.timestamp_millis(),
        uuid::Uuid::new_v4().simple(),
        from.domain()
    )
}

/// RFC 2231 `attr-char`.
fn is_attr_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte)
}

fn filename_parameter(key: &str, filename: &str) -> (String, String) {
    if filename.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        (key.to_string(), filename.to_string())
    } else {
        (format!("{key}*"), extended_value(filename))
    }
}

fn render_filename(key: &str, filename: &str) -> String {
    match filename_parameter(key, filename) {
        (key, value) if key.ends_with('*') => format!("{key}={value}"),
        (key, value) => {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            format!("{key}=\"{escaped}\"")
        }
    }
}

fn extended_value(value: &str) -> String {
    let mut encoded = String::from("utf-8''");
    for byte in value.bytes() {
        if is_attr_char(byte) {
            encoded.push(byte as char);
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::similar_names)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base() -> MessageBuilder {
        MessageBuilder::new()
            .from(Mailbox::new("no-reply@example.com", Some("Example")).unwrap())
            .to("bob@example.com")
            .subject("Reset")
    }

    #[test]
    fn test_structure_text_only() {
        let message = base().text_body("reset your password").build().unwrap();

        assert!(message.content_type().unwrap().is("multipart", "mixed"));
        assert_eq!(message.parts().len(), 1);
        let alternative = message.alternative().unwrap();
        assert_eq!(alternative.parts().len(), 1);
        assert_eq!(message.text_part().unwrap(), "reset your password");
        assert!(message.html_part().is_err());
    }

    #[test]
    fn test_html_follows_text() {
        let message = base()
            .html_body("<p>hi</p>")
            .text_body("hi")
            .build()
            .unwrap();

        let alternative = message.alternative().unwrap();
        let types: Vec<String> = alternative
            .parts()
            .iter()
            .map(|p| p.content_type().unwrap().sub_type)
            .collect();
        assert_eq!(types, vec!["plain", "html"]);
    }

    #[test]
    fn test_no_bodies_is_buildable() {
        let message = base().build().unwrap();
        assert!(message.alternative().unwrap().parts().is_empty());
    }

    #[test]
    fn test_attachments_follow_alternative_in_order() {
        let message = base()
            .text_body("see attached")
            .attach(Attachment::new("logo.png", ContentType::new("image", "png"), vec![1, 2, 3]))
            .attach(Attachment::new("terms.pdf", ContentType::new("application", "pdf"), vec![4]))
            .build()
            .unwrap();

        assert_eq!(message.parts().len(), 3);
        assert!(message.parts()[0].content_type().unwrap().is("multipart", "alternative"));

        let attachments = message.attachments();
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].filename().as_deref(), Some("logo.png"));
        assert_eq!(attachments[0].decode_body().unwrap(), vec![1, 2, 3]);
        assert_eq!(
            attachments[0].content_type().unwrap().parameter("name"),
            Some("logo.png")
        );
        assert_eq!(attachments[1].filename().as_deref(), Some("terms.pdf"));
    }

    #[test]
    fn test_non_ascii_filename_uses_extended_parameter() {
        let message = base()
            .attach(Attachment::new(
                "conditions-générales.pdf",
                ContentType::new("application", "pdf"),
                vec![],
            ))
            .build()
            .unwrap();

        let attachment = message.attachments()[0];
        let disposition = attachment.headers.get("Content-Disposition").unwrap();
        assert!(disposition.starts_with("attachment; filename*=utf-8''"));
        assert_eq!(
            attachment.filename().as_deref(),
            Some("conditions-générales.pdf")
        );
    }

    #[test]
    fn test_quoted_filename_is_escaped_in_both_headers() {
        let message = base()
            .attach(Attachment::new(
                "say \"hi\".txt",
                ContentType::new("text", "plain"),
                b"hi".to_vec(),
            ))
            .build()
            .unwrap();

        let rendered = String::from_utf8(message.to_bytes()).unwrap();
        assert!(rendered.contains("Content-Type: text/plain; name=\"say \\\"hi\\\".txt\"\r\n"));
        assert!(
            rendered.contains("Content-Disposition: attachment; filename=\"say \\\"hi\\\".txt\"\r\n")
        );

        let attachment = message.attachments()[0];
        let content_type = attachment.content_type().unwrap();
        assert_eq!(content_type.parameter("name"), Some("say \"hi\".txt"));
    }

    #[test]
    fn test_headers() {
        let message = base()
            .reply_to(Mailbox::new("support@example.com", None).unwrap())
            .envelope_from("bounces@example.com")
            .text_body("x")
            .build()
            .unwrap();

        assert_eq!(message.from(), Some("Example <no-reply@example.com>"));
        assert_eq!(message.reply_to(), Some("support@example.com"));
        assert_eq!(message.to(), Some("bob@example.com"));
        assert_eq!(message.subject(), Some("Reset"));
        assert!(message.date().is_some());
        assert!(message.message_id().unwrap().ends_with("@example.com>"));
        assert_eq!(message.envelope_sender(), "bounces@example.com");
        assert_eq!(message.sender, "no-reply@example.com");
    }

    #[test]
    fn test_reply_to_defaults_to_from() {
        let message = base().build().unwrap();
        assert_eq!(message.reply_to(), message.from());
        assert_eq!(message.envelope_sender(), "no-reply@example.com");
    }

    #[test]
    fn test_utf8_subject_encoded() {
        let message = base().subject("Réinitialisation").build().unwrap();
        let subject = message.subject().unwrap();
        assert!(subject.starts_with("=?utf-8?B?"));
        assert_eq!(Headers::decode_value(subject).unwrap(), "Réinitialisation");
    }

    #[test]
    fn test_missing_from_and_to() {
        assert!(matches!(
            MessageBuilder::new().to("bob@example.com").build(),
            Err(Error::MissingHeader(_))
        ));
        assert!(matches!(
            MessageBuilder::new()
                .from(Mailbox::new("a@example.com", None).unwrap())
                .build(),
            Err(Error::MissingHeader(_))
        ));
    }

    #[test]
    fn test_blank_to_rejected() {
        assert!(matches!(
            base().to("  ").build(),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(
            base().to("bob@example.com\r\nBcc: eve@example.com").build(),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_rendered_boundaries_nest() {
        let message = base().text_body("a").html_body("<b>a</b>").build().unwrap();
        let rendered = String::from_utf8(message.to_bytes()).unwrap();

        let mixed = message.content_type().unwrap().boundary().unwrap().to_string();
        let alt = message
            .alternative()
            .unwrap()
            .content_type()
            .unwrap()
            .boundary()
            .unwrap()
            .to_string();
        assert_ne!(mixed, alt);

        let mixed_open = rendered.find(&format!("--{mixed}\r\n")).unwrap();
        let alt_close = rendered.find(&format!("--{alt}--\r\n")).unwrap();
        let mixed_close = rendered.find(&format!("--{mixed}--\r\n")).unwrap();
        assert!(mixed_open < alt_close && alt_close < mixed_close);
        assert!(rendered.contains("MIME-Version: 1.0\r\n"));
    }

    proptest! {
        #[test]
        fn alternative_holds_exactly_the_supplied_bodies(
            text in proptest::option::of("[a-zA-Z0-9 .,!é]{1,200}"),
            html in proptest::option::of("<p>[a-zA-Z0-9 ]{1,100}</p>"),
        ) {
            let mut builder = base();
            if let Some(text) = &text {
                builder = builder.text_body(text.clone());
            }
            if let Some(html) = &html {
                builder = builder.html_body(html.clone());
            }
            let message = builder.build().unwrap();
            let parts = message.alternative().unwrap().parts();

            let expected = usize::from(text.is_some()) + usize::from(html.is_some());
            prop_assert_eq!(parts.len(), expected);
            let mut parts = parts.iter();
            if let Some(text) = text {
                let part = parts.next().unwrap();
                prop_assert!(part.content_type().unwrap().is("text", "plain"));
                prop_assert_eq!(part.body_text().unwrap(), text);
            }
            if let Some(html) = html {
                let part = parts.next().unwrap();
                prop_assert!(part.content_type().unwrap().is("text", "html"));
                prop_assert_eq!(part.body_text().unwrap(), html);
            }
        }
    }
}
