//! Service extensions advertised in the EHLO reply.

/// SMTP extension discovered from an EHLO reply line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS
    StartTls,
    /// AUTH with the mechanisms this client knows
    Auth(Vec<AuthMechanism>),
    /// SIZE with the optional maximum message size
    Size(Option<usize>),
    /// Anything else, kept verbatim
    Unknown(String),
}

impl Extension {
    /// Parses an extension line from an EHLO reply.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Self::Unknown(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(words.filter_map(AuthMechanism::parse).collect()),
            "SIZE" => Self::Size(words.next().and_then(|s| s.parse().ok())),
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL mechanism usable for password authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN (RFC 4616)
    Plain,
    /// LOGIN (legacy, still common on submission servers)
    Login,
}

impl AuthMechanism {
    /// Parses a mechanism name; unknown mechanisms yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
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

    mod extension_parse_tests {
        use super::*;

        #[test]
        fn parse_starttls() {
            assert_eq!(Extension::parse("STARTTLS"), Extension::StartTls);
            assert_eq!(Extension::parse("starttls"), Extension::StartTls);
        }

        #[test]
        fn parse_auth_skips_unknown_mechanisms() {
            let ext = Extension::parse("AUTH CRAM-MD5 LOGIN XOAUTH2 PLAIN");
            assert_eq!(
                ext,
                Extension::Auth(vec![AuthMechanism::Login, AuthMechanism::Plain])
            );
        }

        #[test]
        fn parse_size() {
            assert_eq!(
                Extension::parse("SIZE 52428800"),
                Extension::Size(Some(52_428_800))
            );
            assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
        }

        #[test]
        fn parse_unknown() {
            assert_eq!(
                Extension::parse("ENHANCEDSTATUSCODES"),
                Extension::Unknown("ENHANCEDSTATUSCODES".into())
            );
            assert_eq!(
                Extension::parse("8BITMIME"),
                Extension::Unknown("8BITMIME".into())
            );
            assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
        }
    }

    mod auth_mechanism_tests {
        use super::*;

        #[test]
        fn parse() {
            assert_eq!(AuthMechanism::parse("plain"), Some(AuthMechanism::Plain));
            assert_eq!(AuthMechanism::parse("LOGIN"), Some(AuthMechanism::Login));
            assert_eq!(AuthMechanism::parse("GSSAPI"), None);
        }

        #[test]
        fn as_str() {
            assert_eq!(AuthMechanism::Plain.as_str(), "PLAIN");
            assert_eq!(AuthMechanism::Login.as_str(), "LOGIN");
        }
    }
}
