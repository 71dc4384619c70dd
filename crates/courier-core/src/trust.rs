//! TLS trust configuration.
//!
//! A [`TrustProvider`] supplies optional trust anchors and a hostname
//! verification policy. [`configure`] turns them into the client
//! configuration installed on the SMTP connection.
//!
//! # Security
//!
//! [`HostnameVerificationPolicy::Any`] accepts a certificate issued for any
//! host, as long as it chains to a trusted root. It is meant for relays
//! reached under an internal name or address and is unsafe on untrusted
//! networks.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};

/// Hostname verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostnameVerificationPolicy {
    /// Certificate must be issued for the server's host name.
    #[default]
    Strict,
    /// Any host name is accepted (insecure, see module docs).
    Any,
}

/// Errors while building trust material.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    /// Truststore file could not be read.
    #[error("Could not read truststore {path}: {source}")]
    Io {
        /// Truststore path.
        path: PathBuf,
        /// I/O failure.
        #[source]
        source: io::Error,
    },

    /// Truststore holds no usable certificate.
    #[error("Truststore {0} contains no usable certificates")]
    NoCertificates(PathBuf),

    /// The client configuration could not be built.
    #[error("Could not build TLS client configuration: {0}")]
    Client(#[from] courier_smtp::Error),
}

/// Source of TLS trust anchors and policy.
///
/// Shared between concurrent sends; implementations only read.
pub trait TrustProvider: Send + Sync {
    /// Custom trust anchors, or `None` for the bundled web roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the anchors cannot be loaded.
    fn root_store(&self) -> Result<Option<RootCertStore>, TrustError>;

    /// Hostname verification policy.
    fn policy(&self) -> HostnameVerificationPolicy;
}

/// Trust material installed on one connection.
#[derive(Debug, Clone, Default)]
pub struct TrustMaterial {
    /// Custom client configuration; `None` uses the transport default.
    pub client_config: Option<Arc<ClientConfig>>,
    /// True when certificates are accepted for any host name.
    pub hostname_verification_disabled: bool,
}

/// Builds the trust material for an encrypted connection.
///
/// # Errors
///
/// Returns an error if the provider fails or the configuration cannot be
/// built.
pub fn configure(provider: &dyn TrustProvider) -> Result<TrustMaterial, TrustError> {
    let roots = provider.root_store()?;
    let any_host = provider.policy() == HostnameVerificationPolicy::Any;

    let client_config = match roots {
        Some(roots) => Some(courier_smtp::tls::client_config(roots, !any_host)?),
        None if any_host => Some(courier_smtp::tls::client_config(
            courier_smtp::tls::webpki_root_store(),
            false,
        )?),
        None => None,
    };

    if any_host {
        tracing::warn!("TLS hostname verification is disabled");
    }

    Ok(TrustMaterial {
        client_config: client_config.map(Arc::new),
        hostname_verification_disabled: any_host,
    })
}

/// Bundled web roots with strict hostname checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTrust;

impl TrustProvider for DefaultTrust {
    fn root_store(&self) -> Result<Option<RootCertStore>, TrustError> {
        Ok(None)
    }

    fn policy(&self) -> HostnameVerificationPolicy {
        HostnameVerificationPolicy::Strict
    }
}

/// PEM truststore on disk.
///
/// The file is read on every call so a rotated truststore is picked up by
/// the next send.
#[derive(Debug, Clone)]
pub struct PemTruststore {
    path: PathBuf,
    policy: HostnameVerificationPolicy,
}

impl PemTruststore {
    /// Creates a truststore reading `path` with strict hostname checks.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            policy: HostnameVerificationPolicy::Strict,
        }
    }

    /// Sets the hostname verification policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: HostnameVerificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the truststore path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrustProvider for PemTruststore {
    fn root_store(&self) -> Result<Option<RootCertStore>, TrustError> {
        let io_error = |source| TrustError::Io {
            path: self.path.clone(),
            source,
        };

        let file = File::open(&self.path).map_err(io_error)?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_error)?;

        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(certs);
        tracing::debug!(path = %self.path.display(), added, ignored, "Loaded truststore");

        if added == 0 {
            return Err(TrustError::NoCertificates(self.path.clone()));
        }
        Ok(Some(store))
    }

    fn policy(&self) -> HostnameVerificationPolicy {
        self.policy
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

    const FIXTURE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/relay.pem");

    struct AnyHostWebRoots;

    impl TrustProvider for AnyHostWebRoots {
        fn root_store(&self) -> Result<Option<RootCertStore>, TrustError> {
            Ok(None)
        }

        fn policy(&self) -> HostnameVerificationPolicy {
            HostnameVerificationPolicy::Any
        }
    }

    #[test]
    fn test_default_trust_uses_transport_default() {
        let material = configure(&DefaultTrust).unwrap();
        assert!(material.client_config.is_none());
        assert!(!material.hostname_verification_disabled);
    }

    #[test]
    fn test_any_policy_without_roots() {
        let material = configure(&AnyHostWebRoots).unwrap();
        assert!(material.client_config.is_some());
        assert!(material.hostname_verification_disabled);
    }

    #[test]
    fn test_pem_truststore_strict() {
        let material = configure(&PemTruststore::new(FIXTURE)).unwrap();
        assert!(material.client_config.is_some());
        assert!(!material.hostname_verification_disabled);
    }

    #[test]
    fn test_pem_truststore_any() {
        let provider = PemTruststore::new(FIXTURE).with_policy(HostnameVerificationPolicy::Any);
        let material = configure(&provider).unwrap();
        assert!(material.client_config.is_some());
        assert!(material.hostname_verification_disabled);
    }

    #[test]
    fn test_missing_truststore() {
        let err = configure(&PemTruststore::new("/nonexistent/truststore.pem")).unwrap_err();
        assert!(matches!(err, TrustError::Io { .. }));
    }

    #[test]
    fn test_truststore_without_certificates() {
        let path = std::env::temp_dir().join(format!("courier-empty-{}.pem", std::process::id()));
        std::fs::write(&path, "not a certificate\n").unwrap();
        let err = PemTruststore::new(&path).root_store().unwrap_err();
        assert!(matches!(err, TrustError::NoCertificates(_)));
    }
}
