//! Envelope addresses.

use crate::error::{Error, Result};

/// Email address used in `MAIL FROM` and `RCPT TO`.
///
/// Only the envelope syntax is checked here: a single `@` between non-empty
/// local and domain parts, and nothing that would break out of the command
/// line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "Address contains forbidden characters: {addr:?}"
            )));
        }

        match addr.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {
                if domain.contains('@') {
                    return Err(Error::InvalidAddress(
                        "Address must have exactly one @".into(),
                    ));
                }
                Ok(())
            }
            Some(_) => Err(Error::InvalidAddress(
                "Local and domain parts cannot be empty".into(),
            )),
            None => Err(Error::InvalidAddress("Address must contain @".into())),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
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
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
        assert_eq!(addr.to_string(), "user@example.com");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in ["", "userexample.com", "@example.com", "user@", "a@b@c"] {
            assert!(Address::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_command_injection() {
        assert!(Address::new("user@example.com>\r\nRCPT TO:<evil@example.com").is_err());
        assert!(Address::new("user name@example.com").is_err());
    }
}
