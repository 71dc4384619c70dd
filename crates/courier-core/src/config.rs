//! Transport configuration parsed from the caller's string map.

use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::time::Duration;

use courier_smtp::Timeouts;

/// Recognized configuration keys.
pub mod keys {
    /// SMTP host.
    pub const HOST: &str = "host";
    /// SMTP port.
    pub const PORT: &str = "port";
    /// `"true"` to authenticate.
    pub const AUTH: &str = "auth";
    /// `"true"` for implicit TLS.
    pub const SSL: &str = "ssl";
    /// `"true"` for STARTTLS.
    pub const STARTTLS: &str = "starttls";
    /// From address.
    pub const FROM: &str = "from";
    /// From display name.
    pub const FROM_DISPLAY_NAME: &str = "fromDisplayName";
    /// Reply-To address.
    pub const REPLY_TO: &str = "replyTo";
    /// Reply-To display name.
    pub const REPLY_TO_DISPLAY_NAME: &str = "replyToDisplayName";
    /// Envelope sender (bounce address).
    pub const ENVELOPE_FROM: &str = "envelopeFrom";
    /// SMTP user.
    pub const USER: &str = "user";
    /// SMTP password.
    pub const PASSWORD: &str = "password";
    /// Connect timeout in milliseconds.
    pub const CONNECTION_TIMEOUT: &str = "connectionTimeout";
    /// Read/write timeout in milliseconds.
    pub const TIMEOUT: &str = "timeout";
}

/// Default connect and I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors in the configuration map.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Port is not a number in 1..=65535.
    #[error("Invalid port {value:?}")]
    InvalidPort {
        /// Configured value.
        value: String,
        /// Parse failure, if the value was not numeric.
        #[source]
        source: Option<ParseIntError>,
    },

    /// Timeout is not a positive number of milliseconds.
    #[error("Invalid {key} {value:?}, expected a positive number of milliseconds")]
    InvalidTimeout {
        /// Configuration key.
        key: &'static str,
        /// Configured value.
        value: String,
        /// Parse failure, if the value was not numeric.
        #[source]
        source: Option<ParseIntError>,
    },
}

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Security {
    /// No encryption.
    #[default]
    None,
    /// Implicit TLS (connect directly with TLS).
    Tls,
    /// STARTTLS upgrade after plaintext connect.
    StartTls,
}

impl Security {
    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::None => "None (insecure)",
            Self::Tls => "SSL/TLS",
            Self::StartTls => "STARTTLS",
        }
    }

    /// Port used when none is configured.
    #[must_use]
    pub const fn default_port(&self) -> u16 {
        match self {
            Self::None | Self::StartTls => 25,
            Self::Tls => 465,
        }
    }
}

/// Typed transport settings for one send.
#[derive(Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// SMTP host.
    pub host: String,
    /// SMTP port, already defaulted from the security mode.
    pub port: u16,
    /// Authenticate with `user` and `password`.
    pub auth: bool,
    /// Implicit TLS.
    pub ssl: bool,
    /// STARTTLS.
    pub starttls: bool,
    /// From address (validated when the message is composed).
    pub from: String,
    /// From display name.
    pub from_display_name: Option<String>,
    /// Reply-To address; From is used when absent.
    pub reply_to: Option<String>,
    /// Reply-To display name.
    pub reply_to_display_name: Option<String>,
    /// Envelope sender; From is used when absent.
    pub envelope_from: Option<String>,
    /// SMTP user.
    pub user: Option<String>,
    /// SMTP password.
    pub password: Option<String>,
    /// TCP connect and TLS handshake timeout.
    pub connect_timeout: Duration,
    /// Per read/write timeout.
    pub io_timeout: Duration,
}

impl TransportConfig {
    /// Parses the configuration map.
    ///
    /// Flags are set only by the exact value `"true"`. Empty optional
    /// values count as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the port or a timeout is not a valid number.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let text = |key: &str| {
            map.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
        };
        let flag = |key: &str| map.get(key).is_some_and(|v| v == "true");

        let ssl = flag(keys::SSL);
        let starttls = flag(keys::STARTTLS);
        let security = security_for(ssl, starttls);

        let port = match text(keys::PORT) {
            Some(value) => parse_port(value)?,
            None => security.default_port(),
        };

        Ok(Self {
            host: text(keys::HOST).unwrap_or_else(|| "localhost".to_string()),
            port,
            auth: flag(keys::AUTH),
            ssl,
            starttls,
            from: map.get(keys::FROM).cloned().unwrap_or_default(),
            from_display_name: text(keys::FROM_DISPLAY_NAME),
            reply_to: text(keys::REPLY_TO),
            reply_to_display_name: text(keys::REPLY_TO_DISPLAY_NAME),
            envelope_from: text(keys::ENVELOPE_FROM),
            user: text(keys::USER),
            // Passwords are used verbatim.
            password: map.get(keys::PASSWORD).filter(|p| !p.is_empty()).cloned(),
            connect_timeout: parse_timeout(
                keys::CONNECTION_TIMEOUT,
                text(keys::CONNECTION_TIMEOUT),
            )?,
            io_timeout: parse_timeout(keys::TIMEOUT, text(keys::TIMEOUT))?,
        })
    }

    /// Security mode; implicit TLS wins when both flags are set.
    #[must_use]
    pub const fn security(&self) -> Security {
        security_for(self.ssl, self.starttls)
    }

    /// Returns true when trust material must be configured.
    #[must_use]
    pub const fn requires_tls(&self) -> bool {
        self.ssl || self.starttls
    }

    /// Connect and I/O deadlines for the SMTP client.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: self.connect_timeout,
            io: self.io_timeout,
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth", &self.auth)
            .field("ssl", &self.ssl)
            .field("starttls", &self.starttls)
            .field("from", &self.from)
            .field("from_display_name", &self.from_display_name)
            .field("reply_to", &self.reply_to)
            .field("reply_to_display_name", &self.reply_to_display_name)
            .field("envelope_from", &self.envelope_from)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

const fn security_for(ssl: bool, starttls: bool) -> Security {
    if ssl {
        Security::Tls
    } else if starttls {
        Security::StartTls
    } else {
        Security::None
    }
}

fn parse_port(value: String) -> Result<u16, ConfigError> {
    match value.parse::<u16>() {
        Ok(0) => Err(ConfigError::InvalidPort {
            value,
            source: None,
        }),
        Ok(port) => Ok(port),
        Err(source) => Err(ConfigError::InvalidPort {
            value,
            source: Some(source),
        }),
    }
}

fn parse_timeout(key: &'static str, value: Option<String>) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(DEFAULT_TIMEOUT);
    };
    match value.parse::<u64>() {
        // Zero would fail every connect immediately.
        Ok(0) => Err(ConfigError::InvalidTimeout {
            key,
            value,
            source: None,
        }),
        Ok(millis) => Ok(Duration::from_millis(millis)),
        Err(source) => Err(ConfigError::InvalidTimeout {
            key,
            value,
            source: Some(source),
        }),
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

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = TransportConfig::from_map(&map(&[("from", "no-reply@example.com")])).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 25);
        assert!(!config.auth);
        assert_eq!(config.security(), Security::None);
        assert!(!config.requires_tls());
        assert_eq!(config.connect_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.io_timeout, DEFAULT_TIMEOUT);
        assert!(config.reply_to.is_none());
    }

    #[test]
    fn test_only_exact_true_is_truthy() {
        for value in ["TRUE", "True", "yes", "1", " true"] {
            let config = TransportConfig::from_map(&map(&[("auth", value), ("ssl", value)])).unwrap();
            assert!(!config.auth, "{value:?} must not enable auth");
            assert!(!config.ssl, "{value:?} must not enable ssl");
        }
        let config = TransportConfig::from_map(&map(&[("auth", "true")])).unwrap();
        assert!(config.auth);
    }

    #[test]
    fn test_ssl_wins_over_starttls() {
        let config =
            TransportConfig::from_map(&map(&[("ssl", "true"), ("starttls", "true")])).unwrap();
        assert_eq!(config.security(), Security::Tls);
        assert_eq!(config.port, 465);
        assert!(config.requires_tls());

        let config = TransportConfig::from_map(&map(&[("starttls", "true")])).unwrap();
        assert_eq!(config.security(), Security::StartTls);
        assert_eq!(config.port, 25);
    }

    #[test]
    fn test_explicit_port_and_timeouts() {
        let config = TransportConfig::from_map(&map(&[
            ("host", "smtp.example.com"),
            ("port", "587"),
            ("connectionTimeout", "2500"),
            ("timeout", "30000"),
        ]))
        .unwrap();
        assert_eq!(config.host, "smtp.example.com");
        assert_eq!(config.port, 587);
        assert_eq!(config.timeouts().connect, Duration::from_millis(2500));
        assert_eq!(config.timeouts().io, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_numbers() {
        assert!(matches!(
            TransportConfig::from_map(&map(&[("port", "smtp")])),
            Err(ConfigError::InvalidPort { source: Some(_), .. })
        ));
        assert!(matches!(
            TransportConfig::from_map(&map(&[("port", "0")])),
            Err(ConfigError::InvalidPort { source: None, .. })
        ));
        assert!(matches!(
            TransportConfig::from_map(&map(&[("port", "70000")])),
            Err(ConfigError::InvalidPort { .. })
        ));
        assert!(matches!(
            TransportConfig::from_map(&map(&[("timeout", "10s")])),
            Err(ConfigError::InvalidTimeout { key: "timeout", source: Some(_), .. })
        ));
        for key in ["timeout", "connectionTimeout"] {
            assert!(matches!(
                TransportConfig::from_map(&map(&[(key, "0")])),
                Err(ConfigError::InvalidTimeout { source: None, .. })
            ));
        }
    }

    #[test]
    fn test_empty_optionals_are_absent() {
        let config = TransportConfig::from_map(&map(&[
            ("replyTo", ""),
            ("envelopeFrom", "  "),
            ("fromDisplayName", ""),
            ("password", ""),
        ]))
        .unwrap();
        assert!(config.reply_to.is_none());
        assert!(config.envelope_from.is_none());
        assert!(config.from_display_name.is_none());
        assert!(config.password.is_none());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = TransportConfig::from_map(&map(&[
            ("user", "alice"),
            ("password", "hunter2"),
        ]))
        .unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("alice"));
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }
}
