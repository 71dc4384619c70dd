//! SMTP connection management with type-state pattern.

mod client;
mod stream;

pub use client::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, SmtpConnection,
};
pub use stream::{MAX_LINE_LEN, SmtpStream, connect, connect_tls};

use std::collections::HashSet;
use std::time::Duration;

use crate::types::{AuthMechanism, Extension};

/// Connect and per-operation I/O deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect and TLS handshake.
    pub connect: Duration,
    /// Each read or write on an established connection.
    pub io: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            io: Duration::from_secs(10),
        }
    }
}

/// Server capabilities from the greeting and EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// False when the server only accepted HELO.
    pub esmtp: bool,
    /// Supported extensions.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Checks if the SIZE extension is advertised, with or without a limit.
    #[must_use]
    pub fn supports_size(&self) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Size(_)))
    }

    /// Returns the maximum message size, if advertised. `SIZE 0` means no
    /// fixed limit.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(Some(size)) if *size > 0 => Some(*size),
            _ => None,
        })
    }

    /// Returns the advertised authentication mechanisms this client knows.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Checks if AUTH was advertised at all.
    #[must_use]
    pub fn advertises_auth(&self) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Auth(_)))
    }
}
