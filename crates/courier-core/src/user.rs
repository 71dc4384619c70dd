//! Recipient capability.

/// Something that knows the address to notify.
pub trait EmailAddressSource: Sync {
    /// Returns the user's email address, if one is on file.
    fn email(&self) -> Option<&str>;
}

impl EmailAddressSource for str {
    fn email(&self) -> Option<&str> {
        Some(self)
    }
}

impl EmailAddressSource for String {
    fn email(&self) -> Option<&str> {
        Some(self)
    }
}

impl<T: EmailAddressSource + ?Sized> EmailAddressSource for &T {
    fn email(&self) -> Option<&str> {
        (**self).email()
    }
}

impl<T: EmailAddressSource> EmailAddressSource for Option<T> {
    fn email(&self) -> Option<&str> {
        self.as_ref().and_then(EmailAddressSource::email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Account {
        email: Option<String>,
    }

    impl EmailAddressSource for Account {
        fn email(&self) -> Option<&str> {
            self.email.as_deref()
        }
    }

    #[test]
    fn test_sources() {
        assert_eq!("bob@example.com".email(), Some("bob@example.com"));
        assert_eq!(String::from("a@b").email(), Some("a@b"));
        assert_eq!(None::<String>.email(), None);

        let account = Account { email: None };
        assert_eq!((&account).email(), None);
    }
}
