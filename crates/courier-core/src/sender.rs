//! Notification sending: the entry point tying the pipeline together.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use courier_mime::Attachment;

use crate::attachment;
use crate::compose::{self, Content};
use crate::config::TransportConfig;
use crate::error::{EmailError, Result};
use crate::theme::Theme;
use crate::transport::TransportSession;
use crate::trust::TrustProvider;
use crate::user::EmailAddressSource;

/// One notification to send.
pub struct SendRequest<'a> {
    /// Transport configuration map.
    pub config: &'a HashMap<String, String>,
    /// User being notified.
    pub recipient: &'a dyn EmailAddressSource,
    /// Subject line.
    pub subject: &'a str,
    /// Plain-text body.
    pub text_body: Option<&'a str>,
    /// HTML body.
    pub html_body: Option<&'a str>,
}

impl fmt::Debug for SendRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendRequest")
            .field("recipient", &self.recipient.email())
            .field("subject", &self.subject)
            .field("text_body", &self.text_body.is_some())
            .field("html_body", &self.html_body.is_some())
            .finish_non_exhaustive()
    }
}

/// Sends themed notification emails.
///
/// Cheap to clone; clones share the theme and trust provider, and
/// concurrent sends are independent of each other.
#[derive(Clone)]
pub struct EmailSenderProvider {
    theme: Arc<dyn Theme>,
    trust: Arc<dyn TrustProvider>,
}

impl fmt::Debug for EmailSenderProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailSenderProvider").finish_non_exhaustive()
    }
}

impl EmailSenderProvider {
    /// Creates a sender using `theme` for attachments and `trust` for TLS.
    #[must_use]
    pub fn new(theme: Arc<dyn Theme>, trust: Arc<dyn TrustProvider>) -> Self {
        Self { theme, trust }
    }

    /// Sends one notification to `user`.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the pipeline; see [`EmailError`].
    pub async fn send<U>(
        &self,
        config: &HashMap<String, String>,
        user: &U,
        subject: &str,
        text_body: Option<&str>,
        html_body: Option<&str>,
    ) -> Result<()>
    where
        U: EmailAddressSource + ?Sized,
    {
        self.send_request(SendRequest {
            config,
            recipient: &user,
            subject,
            text_body,
            html_body,
        })
        .await
    }

    /// Sends one notification.
    ///
    /// The failure is logged here, once, with its cause.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the pipeline; see [`EmailError`].
    pub async fn send_request(&self, request: SendRequest<'_>) -> Result<()> {
        let recipient = request.recipient.email().unwrap_or_default().to_string();
        match self.deliver(request).await {
            Ok(()) => {
                tracing::info!(%recipient, "Notification email sent");
                Ok(())
            }
            Err(err) => Err(log_failure(&recipient, err)),
        }
    }

    /// Blocking variant of [`send`](Self::send).
    ///
    /// Drives the send on a single-threaded runtime on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics when called from within an async runtime; use
    /// [`send`](Self::send) there.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError::Runtime`] if the runtime cannot start, otherwise
    /// as [`send`](Self::send).
    pub fn send_blocking<U>(
        &self,
        config: &HashMap<String, String>,
        user: &U,
        subject: &str,
        text_body: Option<&str>,
        html_body: Option<&str>,
    ) -> Result<()>
    where
        U: EmailAddressSource + ?Sized,
    {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                return Err(log_failure(
                    user.email().unwrap_or_default(),
                    EmailError::Runtime(err),
                ));
            }
        };
        runtime.block_on(self.send(config, user, subject, text_body, html_body))
    }

    async fn deliver(&self, request: SendRequest<'_>) -> Result<()> {
        let config = TransportConfig::from_map(request.config)?;
        let recipient = request.recipient.email().unwrap_or_default();

        let attachments = self.resolve_attachments().await;
        let content = Content {
            subject: request.subject,
            text_body: request.text_body,
            html_body: request.html_body,
        };
        let envelope = compose::compose(&config, recipient, content, attachments)?;
        tracing::debug!(
            attachments = envelope.message.attachments().len(),
            "Composed notification"
        );

        let session = TransportSession::configure(&config, self.trust.as_ref())?;
        session.deliver(&envelope).await
    }

    /// Reads theme attachments on the blocking pool; file reads never stall
    /// the runtime's worker threads.
    async fn resolve_attachments(&self) -> Vec<Attachment> {
        let theme = Arc::clone(&self.theme);
        match tokio::task::spawn_blocking(move || attachment::resolve(theme.as_ref())).await {
            Ok(attachments) => attachments,
            Err(err) => {
                tracing::warn!(error = %err, "Attachment resolution task failed");
                Vec::new()
            }
        }
    }
}

fn log_failure(recipient: &str, err: EmailError) -> EmailError {
    use std::error::Error as _;

    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    tracing::error!(
        %recipient,
        error = %err,
        causes = ?causes,
        "Failed to send notification email"
    );
    err
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
    use crate::theme::MemoryTheme;
    use crate::trust::DefaultTrust;

    fn provider() -> EmailSenderProvider {
        EmailSenderProvider::new(Arc::new(MemoryTheme::new()), Arc::new(DefaultTrust))
    }

    fn config(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_blank_from_fails_before_connecting() {
        // Port 9 (discard) is never contacted: validation comes first.
        let config = config(&[("from", "  "), ("host", "127.0.0.1"), ("port", "9")]);
        let err = provider()
            .send(&config, "bob@example.com", "Reset", Some("hi"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::InvalidAddress { field: "From", .. }));
    }

    #[tokio::test]
    async fn test_user_without_email() {
        let config = config(&[("from", "no-reply@example.com")]);
        let err = provider()
            .send(&config, &None::<String>, "Reset", Some("hi"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::InvalidAddress { field: "recipient", .. }));
    }

    #[tokio::test]
    async fn test_invalid_port_is_config_error() {
        let config = config(&[("from", "no-reply@example.com"), ("port", "smtp")]);
        let err = provider()
            .send(&config, "bob@example.com", "Reset", Some("hi"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EmailError::Config(_)));
        assert!(err.is_local());
    }

    #[test]
    fn test_send_blocking_reports_errors() {
        let config = config(&[("from", "no-reply@example.com"), ("auth", "true")]);
        let err = provider()
            .send_blocking(&config, "bob@example.com", "Reset", Some("hi"), None)
            .unwrap_err();
        assert!(matches!(err, EmailError::Authentication { source: None, .. }));
    }

    #[tokio::test]
    async fn test_attachments_resolved_off_the_runtime() {
        let theme = MemoryTheme::new()
            .with_property("attachments", "img/logo.png, missing.pdf")
            .with_resource("img/logo.png", vec![0x89, b'P', b'N', b'G']);
        let provider = EmailSenderProvider::new(Arc::new(theme), Arc::new(DefaultTrust));

        let attachments = provider.resolve_attachments().await;
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "logo.png");
    }

    #[test]
    fn test_send_blocking_resolves_attachments() {
        let theme = MemoryTheme::new()
            .with_property("attachments", "notes.txt")
            .with_resource("notes.txt", "hello");
        let provider = EmailSenderProvider::new(Arc::new(theme), Arc::new(DefaultTrust));
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let attachments = runtime.block_on(provider.resolve_attachments());
        assert_eq!(attachments.len(), 1);
    }

    #[test]
    fn test_request_debug_hides_bodies() {
        let config = config(&[]);
        let request = SendRequest {
            config: &config,
            recipient: &"bob@example.com",
            subject: "Reset",
            text_body: Some("token 12345"),
            html_body: None,
        };
        let debug = format!("{request:?}");
        assert!(debug.contains("bob@example.com"));
        assert!(!debug.contains("12345"));
    }
}
