//! SMTP reply types.

/// SMTP reply from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply code.
    pub code: ReplyCode,
    /// Text of each reply line, without code and separator.
    pub message: Vec<String>,
}

impl Reply {
    /// Creates a new reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(code: ReplyCode, message: Vec<String>) -> Self {
        Self { code, message }
    }

    /// Returns true for 2xx replies.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Returns the full text, one line per reply line.
    #[must_use]
    pub fn message_text(&self) -> String {
        self.message.join("\n")
    }

    /// Converts a non-2xx reply into an [`Error::SmtpError`](crate::Error::SmtpError).
    ///
    /// # Errors
    ///
    /// Returns the reply as an error unless it is a success reply.
    pub fn into_success(self) -> crate::Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(crate::Error::smtp_error(self.code.as_u16(), self.message_text()))
        }
    }
}

/// Three-digit SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCEEDED: Self = Self(235);
    /// 250 Requested action completed
    pub const OK: Self = Self(250);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 500 Command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 552 Exceeded storage allocation
    pub const EXCEEDED_STORAGE: Self = Self(552);

    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// 3xx
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// 4xx
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
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
    fn classes() {
        assert!(ReplyCode::OK.is_success());
        assert!(ReplyCode::CLOSING.is_success());
        assert!(ReplyCode::START_DATA.is_intermediate());
        assert!(ReplyCode::AUTH_CONTINUE.is_intermediate());
        assert!(ReplyCode::SERVICE_UNAVAILABLE.is_transient());
        assert!(ReplyCode::AUTH_FAILED.is_permanent());
        assert!(!ReplyCode::OK.is_permanent());
    }

    #[test]
    fn display() {
        assert_eq!(ReplyCode::EXCEEDED_STORAGE.to_string(), "552");
    }

    #[test]
    fn into_success() {
        let ok = Reply::new(ReplyCode::OK, vec!["OK".into()]);
        assert!(ok.into_success().is_ok());

        let rejected = Reply::new(
            ReplyCode::MAILBOX_UNAVAILABLE,
            vec!["5.1.1 No such user".into()],
        );
        let err = rejected.into_success().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::SmtpError { code: 550, ref message } if message == "5.1.1 No such user"
        ));
    }

    #[test]
    fn message_text_multiple_lines() {
        let reply = Reply::new(
            ReplyCode::SERVICE_READY,
            vec!["smtp.example.com ESMTP".into(), "Ready".into()],
        );
        assert_eq!(reply.message_text(), "smtp.example.com ESMTP\nReady");
    }
}
