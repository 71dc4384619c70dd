//! Header mailbox (display name + address).

use crate::encoding::{encode_rfc2047, is_header_safe};
use crate::error::{Error, Result};
use std::fmt;

/// Characters that force a display name into a quoted string (RFC 5322 specials).
const SPECIALS: &str = "()<>[]:;@\\,.\"";

/// Mailbox used in From, Reply-To and similar headers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mailbox {
    /// Display name (optional).
    pub name: Option<String>,
    /// Email address.
    pub address: String,
}

impl Mailbox {
    /// Creates a mailbox from an address and an optional display name.
    ///
    /// A blank display name is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddress`] if the address is empty, blank or
    /// malformed.
    pub fn new(address: &str, name: Option<&str>) -> Result<Self> {
        let address = validate_address(address)?;
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(ToString::to_string);
        Ok(Self {
            name,
            address: address.to_string(),
        })
    }

    /// Returns the domain part of the address.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.address
            .rsplit_once('@')
            .map_or("localhost", |(_, domain)| domain)
    }
}

impl fmt::Display for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            None => write!(f, "{}", self.address),
            Some(name) if !is_header_safe(name) => {
                write!(f, "{} <{}>", encode_rfc2047(name, "utf-8"), self.address)
            }
            Some(name) if name.contains(|c| SPECIALS.contains(c)) => {
                let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
                write!(f, "\"{escaped}\" <{}>", self.address)
            }
            Some(name) => write!(f, "{name} <{}>", self.address),
        }
    }
}

/// Validates a bare `local@domain` address and returns it trimmed.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] describing the first problem found.
pub fn validate_address(address: &str) -> Result<&str> {
    let address = address.trim();
    if address.is_empty() {
        return Err(Error::InvalidAddress("Please provide a valid address".into()));
    }

    if address
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
    {
        return Err(Error::InvalidAddress(format!(
            "Address contains illegal characters: {address}"
        )));
    }

    match address.rsplit_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(address),
        _ => Err(Error::InvalidAddress(format!(
            "Address must be of the form local@domain: {address}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_address() {
        let mailbox = Mailbox::new("no-reply@example.com", None).unwrap();
        assert_eq!(mailbox.to_string(), "no-reply@example.com");
        assert_eq!(mailbox.domain(), "example.com");
    }

    #[test]
    fn test_blank_name_is_bare() {
        let mailbox = Mailbox::new("no-reply@example.com", Some("   ")).unwrap();
        assert!(mailbox.name.is_none());
        assert_eq!(mailbox.to_string(), "no-reply@example.com");
    }

    #[test]
    fn test_ascii_name() {
        let mailbox = Mailbox::new("no-reply@example.com", Some("Example Team")).unwrap();
        assert_eq!(mailbox.to_string(), "Example Team <no-reply@example.com>");
    }

    #[test]
    fn test_name_with_specials_is_quoted() {
        let mailbox = Mailbox::new("ops@example.com", Some("Ops, \"Night\" Shift")).unwrap();
        assert_eq!(
            mailbox.to_string(),
            "\"Ops, \\\"Night\\\" Shift\" <ops@example.com>"
        );
    }

    #[test]
    fn test_utf8_name_is_encoded() {
        let mailbox = Mailbox::new("team@example.com", Some("Équipe Sécurité")).unwrap();
        let rendered = mailbox.to_string();
        assert!(rendered.starts_with("=?utf-8?B?"));
        assert!(rendered.ends_with("<team@example.com>"));
    }

    #[test]
    fn test_empty_and_blank_rejected() {
        assert!(matches!(Mailbox::new("", None), Err(Error::InvalidAddress(_))));
        assert!(matches!(Mailbox::new(" \t ", None), Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(validate_address("user").is_err());
        assert!(validate_address("@example.com").is_err());
        assert!(validate_address("user@").is_err());
        assert!(validate_address("a b@example.com").is_err());
        assert!(validate_address("<x@example.com>").is_err());
    }

    #[test]
    fn test_address_trimmed() {
        assert_eq!(validate_address("  bob@example.com ").unwrap(), "bob@example.com");
    }
}
