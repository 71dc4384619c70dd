//! Error types for the delivery pipeline.

use thiserror::Error;

use crate::config::ConfigError;
use crate::trust::TrustError;

/// The single error returned by a failed send.
///
/// Every variant keeps the underlying cause as its source so the full chain
/// can be logged. Attachment problems never appear here: they are logged and
/// the attachment is skipped.
#[derive(Debug, Error)]
pub enum EmailError {
    /// From, Reply-To, envelope sender or recipient is empty or malformed.
    #[error("Invalid {field} address: {source}")]
    InvalidAddress {
        /// Which address was rejected.
        field: &'static str,
        /// Validation failure.
        #[source]
        source: courier_mime::Error,
    },

    /// Transport configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// TLS trust material could not be built.
    #[error("TLS trust setup failed: {0}")]
    TrustSetup(#[from] TrustError),

    /// DNS, TCP connect, TLS handshake, greeting or EHLO failed.
    #[error("Could not connect to {host}:{port}: {source}")]
    TransportConnect {
        /// SMTP host.
        host: String,
        /// SMTP port.
        port: u16,
        /// Underlying failure.
        #[source]
        source: courier_smtp::Error,
    },

    /// Credentials missing or rejected.
    #[error("Authentication failed: {reason}")]
    Authentication {
        /// What went wrong.
        reason: String,
        /// Server rejection, when the server was asked.
        #[source]
        source: Option<courier_smtp::Error>,
    },

    /// The server refused the sender, recipient or message.
    #[error("Transmission failed: {0}")]
    Transmission(#[source] courier_smtp::Error),

    /// The MIME message could not be assembled.
    #[error("Could not build message: {0}")]
    Mime(#[source] courier_mime::Error),

    /// The blocking entry point could not start its runtime.
    #[error("Could not start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl EmailError {
    /// Wraps a MIME-layer failure, keeping address problems distinct.
    pub(crate) fn from_mime(field: &'static str, source: courier_mime::Error) -> Self {
        match source {
            courier_mime::Error::InvalidAddress(_) => Self::InvalidAddress { field, source },
            other => Self::Mime(other),
        }
    }

    /// Wraps a server rejection during authentication.
    pub(crate) fn rejected_credentials(source: courier_smtp::Error) -> Self {
        Self::Authentication {
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Returns true if the failure happened before any network I/O.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidAddress { .. }
                | Self::Config(_)
                | Self::TrustSetup(_)
                | Self::Mime(_)
                | Self::Runtime(_)
                | Self::Authentication { source: None, .. }
        )
    }
}

/// Result type alias using [`EmailError`].
pub type Result<T> = std::result::Result<T, EmailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_errors_stay_distinct() {
        let err = EmailError::from_mime(
            "From",
            courier_mime::Error::InvalidAddress("Please provide a valid address".into()),
        );
        assert!(matches!(err, EmailError::InvalidAddress { field: "From", .. }));
        assert!(err.is_local());

        let err = EmailError::from_mime("To", courier_mime::Error::InvalidHeader("x".into()));
        assert!(matches!(err, EmailError::Mime(_)));
    }

    #[test]
    fn test_source_chain_is_kept() {
        use std::error::Error as _;

        let err = EmailError::rejected_credentials(courier_smtp::Error::smtp_error(
            535,
            "5.7.8 Authentication credentials invalid",
        ));
        assert!(!err.is_local());
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "Authentication failed: SMTP error 535: 5.7.8 Authentication credentials invalid"
        );
    }
}
