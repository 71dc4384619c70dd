//! SMTP transport session.
//!
//! A session is configured once from the [`TransportConfig`] and trust
//! provider, then delivers one [`Envelope`]. The connection is owned by the
//! SMTP client value, so every early return drops it and closes the socket.

use std::fmt;
use std::sync::Arc;

use courier_smtp::connection::{connect, connect_tls};
use courier_smtp::{Client, Connected, SmtpConnection, Timeouts};
use rustls::ClientConfig;

use crate::compose::Envelope;
use crate::config::{Security, TransportConfig};
use crate::error::{EmailError, Result};
use crate::trust::{self, TrustMaterial, TrustProvider};

/// Name announced in EHLO/HELO.
const CLIENT_HOSTNAME: &str = "localhost";

/// SMTP login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name.
    pub user: String,
    password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A configured SMTP session.
#[derive(Debug, Clone)]
pub struct TransportSession {
    host: String,
    port: u16,
    security: Security,
    credentials: Option<Credentials>,
    timeouts: Timeouts,
    trust: Option<TrustMaterial>,
}

impl TransportSession {
    /// Configures a session. Trust material is built only for implicit TLS
    /// or STARTTLS.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError::Authentication`] if `auth` is set without user
    /// and password, and [`EmailError::TrustSetup`] if the trust provider
    /// fails.
    pub fn configure(
        config: &TransportConfig,
        trust_provider: &dyn TrustProvider,
    ) -> Result<Self> {
        let credentials = if config.auth {
            match (&config.user, &config.password) {
                (Some(user), Some(password)) => Some(Credentials::new(user, password)),
                _ => {
                    return Err(EmailError::Authentication {
                        reason: "authentication is enabled but user or password is missing".into(),
                        source: None,
                    });
                }
            }
        } else {
            None
        };

        let trust = if config.requires_tls() {
            Some(trust::configure(trust_provider)?)
        } else {
            None
        };

        let session = Self {
            host: config.host.clone(),
            port: config.port,
            security: config.security(),
            credentials,
            timeouts: config.timeouts(),
            trust,
        };
        tracing::debug!(
            host = %session.host,
            port = session.port,
            security = session.security.display_name(),
            auth = session.credentials.is_some(),
            "Configured SMTP transport"
        );
        Ok(session)
    }

    /// SMTP host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// SMTP port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Security mode.
    #[must_use]
    pub const fn security(&self) -> Security {
        self.security
    }

    /// Credentials, when authentication is enabled.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Connect and I/O deadlines.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Trust material, when TLS was requested.
    #[must_use]
    pub const fn trust(&self) -> Option<&TrustMaterial> {
        self.trust.as_ref()
    }

    /// Custom TLS client configuration, if any.
    #[must_use]
    pub fn tls_config(&self) -> Option<&Arc<ClientConfig>> {
        self.trust.as_ref().and_then(|t| t.client_config.as_ref())
    }

    /// Returns true when certificates are accepted for any host name.
    #[must_use]
    pub fn hostname_verification_disabled(&self) -> bool {
        self.trust
            .as_ref()
            .is_some_and(|t| t.hostname_verification_disabled)
    }

    /// Connects, authenticates and transmits `envelope` to its single
    /// recipient, then sends QUIT.
    ///
    /// A failing QUIT is logged and does not fail the delivery.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError::TransportConnect`] up to and including EHLO and
    /// STARTTLS, [`EmailError::Authentication`] if the server rejects the
    /// credentials and [`EmailError::Transmission`] afterwards.
    pub async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let client = self.connect().await?;
        let data = envelope.message.to_bytes();
        let size = Some(data.len());

        let client = match &self.credentials {
            Some(credentials) => {
                let client = client
                    .authenticate(&credentials.user, &credentials.password)
                    .await
                    .map_err(EmailError::rejected_credentials)?;
                tracing::debug!(user = %credentials.user, "SMTP authentication succeeded");
                client.mail_from(envelope.mail_from.clone(), size).await
            }
            None => client.mail_from(envelope.mail_from.clone(), size).await,
        }
        .map_err(EmailError::Transmission)?;

        let client = client
            .rcpt_to(envelope.rcpt_to.clone())
            .await
            .map_err(EmailError::Transmission)?;
        let client = client.data().await.map_err(EmailError::Transmission)?;
        let client = client
            .send_message(&data)
            .await
            .map_err(EmailError::Transmission)?;

        if let Err(err) = client.quit().await {
            tracing::warn!(error = %err, "Failed to close SMTP connection");
        }
        Ok(())
    }

    async fn connect(&self) -> Result<Client<Connected>> {
        let connect_error = |source| EmailError::TransportConnect {
            host: self.host.clone(),
            port: self.port,
            source,
        };
        let tls_config = self.tls_config().cloned();

        let stream = match self.security {
            Security::Tls => {
                connect_tls(&self.host, self.port, tls_config.clone(), self.timeouts).await
            }
            Security::StartTls | Security::None => {
                connect(&self.host, self.port, self.timeouts).await
            }
        }
        .map_err(connect_error)?;

        let client = Client::from_stream(stream).await.map_err(connect_error)?;
        let client = client.ehlo(CLIENT_HOSTNAME).await.map_err(connect_error)?;
        let client = if self.security == Security::StartTls {
            client
                .starttls(&self.host, tls_config)
                .await
                .map_err(connect_error)?
        } else {
            client
        };

        tracing::debug!(
            host = %self.host,
            port = self.port,
            encrypted = client.is_encrypted(),
            "Connected to SMTP server"
        );
        Ok(client)
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
    use crate::trust::{DefaultTrust, HostnameVerificationPolicy, TrustError};
    use rustls::RootCertStore;
    use std::collections::HashMap;

    struct Policy(HostnameVerificationPolicy);

    impl TrustProvider for Policy {
        fn root_store(&self) -> std::result::Result<Option<RootCertStore>, TrustError> {
            Ok(None)
        }

        fn policy(&self) -> HostnameVerificationPolicy {
            self.0
        }
    }

    struct FailingTrust;

    impl TrustProvider for FailingTrust {
        fn root_store(&self) -> std::result::Result<Option<RootCertStore>, TrustError> {
            Err(TrustError::NoCertificates("/etc/courier/truststore.pem".into()))
        }

        fn policy(&self) -> HostnameVerificationPolicy {
            HostnameVerificationPolicy::Strict
        }
    }

    fn config(pairs: &[(&str, &str)]) -> TransportConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        TransportConfig::from_map(&map).unwrap()
    }

    #[test]
    fn test_plain_session_has_no_tls_and_no_auth() {
        let session = TransportSession::configure(
            &config(&[("auth", "false"), ("ssl", "false"), ("starttls", "false")]),
            &FailingTrust,
        )
        .unwrap();
        assert_eq!(session.security(), Security::None);
        assert!(session.trust().is_none());
        assert!(session.tls_config().is_none());
        assert!(session.credentials().is_none());
        assert!(!session.hostname_verification_disabled());
    }

    #[test]
    fn test_any_policy_disables_hostname_verification() {
        for flag in ["ssl", "starttls"] {
            let session = TransportSession::configure(
                &config(&[(flag, "true")]),
                &Policy(HostnameVerificationPolicy::Any),
            )
            .unwrap();
            assert!(session.hostname_verification_disabled(), "{flag}");
            assert!(session.tls_config().is_some());

            let session = TransportSession::configure(
                &config(&[(flag, "true")]),
                &Policy(HostnameVerificationPolicy::Strict),
            )
            .unwrap();
            assert!(!session.hostname_verification_disabled(), "{flag}");
        }
    }

    #[test]
    fn test_implicit_tls_with_credentials() {
        let session = TransportSession::configure(
            &config(&[
                ("auth", "true"),
                ("ssl", "true"),
                ("host", "smtp.example.com"),
                ("port", "465"),
                ("user", "alice"),
                ("password", "secret"),
            ]),
            &DefaultTrust,
        )
        .unwrap();
        assert_eq!(session.host(), "smtp.example.com");
        assert_eq!(session.port(), 465);
        assert_eq!(session.security(), Security::Tls);
        assert_eq!(session.credentials().unwrap().user, "alice");
        assert!(session.trust().is_some());
        assert!(!format!("{session:?}").contains("secret"));
    }

    #[test]
    fn test_auth_without_credentials() {
        let err = TransportSession::configure(&config(&[("auth", "true"), ("user", "alice")]), &DefaultTrust)
            .unwrap_err();
        assert!(matches!(err, EmailError::Authentication { source: None, .. }));
    }

    #[test]
    fn test_trust_failure_only_when_tls_requested() {
        let err = TransportSession::configure(&config(&[("starttls", "true")]), &FailingTrust)
            .unwrap_err();
        assert!(matches!(err, EmailError::TrustSetup(_)));
    }
}
