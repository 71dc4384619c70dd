//! Error types for SMTP operations.

use std::io;
use std::time::Duration;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name cannot be used as a TLS server name.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Certificate verifier could not be built from the trust anchors.
    #[error("Trust configuration error: {0}")]
    Trust(#[from] rustls::client::VerifierBuilderError),

    /// Connect, read or write did not finish in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Server returned error response.
    #[error("SMTP error {code}: {message}")]
    SmtpError {
        /// Reply code (e.g., 550).
        code: u16,
        /// Error message from server.
        message: String,
    },

    /// Protocol error (unexpected response).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Message too large for the server's advertised SIZE limit.
    #[error("Message of {size} bytes exceeds server limit of {limit} bytes")]
    MessageTooLarge {
        /// Message size in bytes.
        size: usize,
        /// Limit advertised by the server.
        limit: usize,
    },

    /// Feature not supported by server.
    #[error("Server does not support {0}")]
    NotSupported(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp_error(code: u16, message: impl Into<String>) -> Self {
        Self::SmtpError {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::SmtpError { code, .. } if *code >= 400 && *code < 500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::smtp_error(550, "no such user").is_permanent());
        assert!(Error::smtp_error(451, "try later").is_transient());
        assert!(!Error::Timeout(Duration::from_secs(10)).is_permanent());
    }

    #[test]
    fn test_display() {
        let err = Error::smtp_error(535, "5.7.8 Authentication credentials invalid");
        assert_eq!(
            err.to_string(),
            "SMTP error 535: 5.7.8 Authentication credentials invalid"
        );
        let err = Error::MessageTooLarge { size: 20, limit: 10 };
        assert_eq!(
            err.to_string(),
            "Message of 20 bytes exceeds server limit of 10 bytes"
        );
    }
}
