//! Message composition: the MIME message plus its SMTP envelope.

use courier_mime::{Attachment, Mailbox, Message, MessageBuilder, validate_address};
use courier_smtp::Address;

use crate::config::TransportConfig;
use crate::error::{EmailError, Result};

/// A composed message ready for transmission.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// The MIME message.
    pub message: Message,
    /// `MAIL FROM` address: the envelope sender, or From.
    pub mail_from: Address,
    /// `RCPT TO` address. The To header carries the same string.
    pub rcpt_to: Address,
}

/// Bodies and subject of one notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct Content<'a> {
    /// Subject line.
    pub subject: &'a str,
    /// Plain-text body.
    pub text_body: Option<&'a str>,
    /// HTML body.
    pub html_body: Option<&'a str>,
}

/// Validates the addresses and builds the message.
///
/// # Errors
///
/// Returns [`EmailError::InvalidAddress`] if From, Reply-To, the envelope
/// sender or the recipient is empty or malformed, and [`EmailError::Mime`]
/// if the message cannot be assembled.
pub fn compose(
    config: &TransportConfig,
    recipient: &str,
    content: Content<'_>,
    attachments: Vec<Attachment>,
) -> Result<Envelope> {
    let from = Mailbox::new(&config.from, config.from_display_name.as_deref())
        .map_err(|e| EmailError::from_mime("From", e))?;

    let reply_to = config
        .reply_to
        .as_deref()
        .map(|address| Mailbox::new(address, config.reply_to_display_name.as_deref()))
        .transpose()
        .map_err(|e| EmailError::from_mime("Reply-To", e))?;

    let mail_from = match config.envelope_from.as_deref() {
        Some(envelope_from) => envelope_address("envelope sender", envelope_from)?,
        None => envelope_address("From", &from.address)?,
    };
    let rcpt_to = envelope_address("recipient", recipient)?;

    let mut builder = MessageBuilder::new()
        .from(from)
        .to(rcpt_to.as_str())
        .subject(content.subject);
    if let Some(reply_to) = reply_to {
        builder = builder.reply_to(reply_to);
    }
    if config.envelope_from.is_some() {
        builder = builder.envelope_from(mail_from.as_str());
    }
    if let Some(text) = content.text_body {
        builder = builder.text_body(text);
    }
    if let Some(html) = content.html_body {
        builder = builder.html_body(html);
    }
    for attachment in attachments {
        builder = builder.attach(attachment);
    }

    let message = builder
        .build()
        .map_err(|e| EmailError::from_mime("recipient", e))?;

    Ok(Envelope {
        message,
        mail_from,
        rcpt_to,
    })
}

fn envelope_address(field: &'static str, raw: &str) -> Result<Address> {
    let address = validate_address(raw).map_err(|e| EmailError::from_mime(field, e))?;
    Address::new(address).map_err(|e| EmailError::InvalidAddress {
        field,
        source: courier_mime::Error::InvalidAddress(e.to_string()),
    })
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
    use courier_mime::ContentType;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> TransportConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        TransportConfig::from_map(&map).unwrap()
    }

    fn content<'a>(text: Option<&'a str>, html: Option<&'a str>) -> Content<'a> {
        Content {
            subject: "Reset",
            text_body: text,
            html_body: html,
        }
    }

    #[test]
    fn test_reply_to_defaults_to_from() {
        let config = config(&[("from", "no-reply@example.com"), ("fromDisplayName", "Example")]);
        let envelope = compose(&config, "bob@example.com", content(Some("hi"), None), vec![]).unwrap();

        assert_eq!(envelope.message.from(), Some("Example <no-reply@example.com>"));
        assert_eq!(envelope.message.reply_to(), envelope.message.from());
        assert_eq!(envelope.message.to(), Some("bob@example.com"));
        assert_eq!(envelope.mail_from.as_str(), "no-reply@example.com");
        assert_eq!(envelope.rcpt_to.as_str(), "bob@example.com");
    }

    #[test]
    fn test_reply_to_and_envelope_from_override() {
        let config = config(&[
            ("from", "no-reply@example.com"),
            ("replyTo", "support@example.com"),
            ("replyToDisplayName", "Support"),
            ("envelopeFrom", "bounces@example.com"),
        ]);
        let envelope = compose(&config, "bob@example.com", content(Some("hi"), None), vec![]).unwrap();

        assert_eq!(envelope.message.reply_to(), Some("Support <support@example.com>"));
        assert_eq!(envelope.message.from(), Some("no-reply@example.com"));
        assert_eq!(envelope.mail_from.as_str(), "bounces@example.com");
        assert_eq!(envelope.message.envelope_sender(), "bounces@example.com");
    }

    #[test]
    fn test_blank_from_is_invalid() {
        for from in ["", "   "] {
            let config = config(&[("from", from)]);
            let err = compose(&config, "bob@example.com", content(Some("hi"), None), vec![]).unwrap_err();
            assert!(matches!(err, EmailError::InvalidAddress { field: "From", .. }));
        }
    }

    #[test]
    fn test_blank_recipient_is_invalid() {
        let config = config(&[("from", "no-reply@example.com")]);
        let err = compose(&config, "", content(Some("hi"), None), vec![]).unwrap_err();
        assert!(matches!(err, EmailError::InvalidAddress { field: "recipient", .. }));
    }

    #[test]
    fn test_malformed_envelope_sender_is_invalid() {
        let config = config(&[("from", "no-reply@example.com"), ("envelopeFrom", "bounces")]);
        let err = compose(&config, "bob@example.com", content(Some("hi"), None), vec![]).unwrap_err();
        assert!(matches!(err, EmailError::InvalidAddress { field: "envelope sender", .. }));
    }

    #[test]
    fn test_body_and_attachments() {
        let config = config(&[("from", "no-reply@example.com")]);
        let logo = Attachment::new("logo.png", ContentType::new("image", "png"), vec![1, 2, 3]);
        let envelope = compose(
            &config,
            "bob@example.com",
            content(Some("reset your password"), Some("<p>reset</p>")),
            vec![logo],
        )
        .unwrap();

        let message = &envelope.message;
        assert_eq!(message.text_part().unwrap(), "reset your password");
        assert_eq!(message.html_part().unwrap(), "<p>reset</p>");
        let attachments = message.attachments();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename().as_deref(), Some("logo.png"));
    }
}
