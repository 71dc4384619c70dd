//! SMTP commands issued by the client.

use crate::types::{Address, AuthMechanism};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO, used when the server rejects EHLO.
    Helo {
        /// Client hostname
        hostname: String,
    },
    /// EHLO
    Ehlo {
        /// Client hostname
        hostname: String,
    },
    /// STARTTLS
    StartTls,
    /// AUTH
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (SASL-IR)
        initial_response: Option<String>,
    },
    /// Bare base64 line answering a `334` challenge.
    AuthResponse(String),
    /// MAIL FROM
    MailFrom {
        /// Envelope sender
        from: Address,
        /// SIZE parameter, sent only when the server advertises SIZE
        size: Option<usize>,
    },
    /// RCPT TO
    RcptTo {
        /// Envelope recipient
        to: Address,
    },
    /// DATA
    Data,
    /// QUIT
    Quit,
}

impl Command {
    /// Serializes the command, including its CRLF terminator.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let line = match self {
            Self::Helo { hostname } => format!("HELO {hostname}"),
            Self::Ehlo { hostname } => format!("EHLO {hostname}"),
            Self::StartTls => "STARTTLS".to_string(),
            Self::Auth {
                mechanism,
                initial_response: Some(resp),
            } => format!("AUTH {} {resp}", mechanism.as_str()),
            Self::Auth {
                mechanism,
                initial_response: None,
            } => format!("AUTH {}", mechanism.as_str()),
            Self::AuthResponse(resp) => resp.clone(),
            Self::MailFrom { from, size: None } => format!("MAIL FROM:<{from}>"),
            Self::MailFrom {
                from,
                size: Some(size),
            } => format!("MAIL FROM:<{from}> SIZE={size}"),
            Self::RcptTo { to } => format!("RCPT TO:<{to}>"),
            Self::Data => "DATA".to_string(),
            Self::Quit => "QUIT".to_string(),
        };

        let mut buf = line.into_bytes();
        buf.extend_from_slice(b"\r\n");
        buf
    }

    /// Returns the text to log for this command, hiding credentials.
    #[must_use]
    pub fn redacted(&self) -> String {
        match self {
            Self::Auth { mechanism, .. } => format!("AUTH {} <redacted>", mechanism.as_str()),
            Self::AuthResponse(_) => "<redacted>".to_string(),
            other => String::from_utf8_lossy(&other.serialize())
                .trim_end()
                .to_string(),
        }
    }
}
