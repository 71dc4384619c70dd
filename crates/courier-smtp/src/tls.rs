//! TLS client configurations for SMTP connections.
//!
//! Two trust policies are supported:
//!
//! - **strict** (default): the certificate chain must lead to a trusted root
//!   and the certificate must be issued for the host being contacted.
//! - **any host**: the chain is still verified against the trust anchors, but
//!   a certificate issued for a different host name is accepted.
//!
//! The second mode is insecure. A network attacker holding any certificate
//! signed by a trusted root can impersonate the server. It exists for
//! deployments that reach their mail relay through an internal name or an
//! IP address not listed in the certificate, and must be opted into
//! explicitly.

use std::sync::Arc;

use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::error::Result;

/// Returns the bundled Mozilla root certificates.
#[must_use]
pub fn webpki_root_store() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

/// Creates the default client configuration: bundled roots, strict checks.
#[must_use]
pub fn default_client_config() -> ClientConfig {
    ClientConfig::builder()
        .with_root_certificates(webpki_root_store())
        .with_no_client_auth()
}

/// Creates a client configuration trusting `roots`.
///
/// With `verify_hostname` set to `false` the certificate's subject names are
/// not compared with the server name (see the module documentation).
///
/// # Errors
///
/// Returns an error if no usable trust anchor is present in `roots`.
pub fn client_config(roots: RootCertStore, verify_hostname: bool) -> Result<ClientConfig> {
    if verify_hostname {
        return Ok(ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth());
    }

    let inner = WebPkiServerVerifier::builder(Arc::new(roots)).build()?;
    Ok(ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AnyHostVerifier { inner }))
        .with_no_client_auth())
}

/// Chain verification without the server name check.
#[derive(Debug)]
struct AnyHostVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

/// Name checks run after the chain has been validated, so these errors mean
/// the chain itself was accepted.
const fn is_name_mismatch(err: &CertificateError) -> bool {
    matches!(
        err,
        CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
    )
}

impl ServerCertVerifier for AnyHostVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(err)) if is_name_mismatch(&err) => {
                tracing::warn!(
                    server = ?server_name,
                    "Accepting certificate not issued for this host (hostname verification disabled)"
                );
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_webpki_roots_not_empty() {
        assert!(!webpki_root_store().is_empty());
    }

    #[test]
    fn test_strict_config() {
        let config = client_config(webpki_root_store(), true).unwrap();
        assert!(config.enable_sni);
    }

    #[test]
    fn test_any_host_config() {
        assert!(client_config(webpki_root_store(), false).is_ok());
    }

    #[test]
    fn test_any_host_requires_anchors() {
        assert!(client_config(RootCertStore::empty(), false).is_err());
    }

    #[test]
    fn test_name_mismatch_detection() {
        assert!(is_name_mismatch(&CertificateError::NotValidForName));
        assert!(!is_name_mismatch(&CertificateError::Expired));
        assert!(!is_name_mismatch(&CertificateError::UnknownIssuer));
    }
}
