//! # courier-core
//!
//! Themed notification email delivery.
//!
//! Given a transport configuration map, a user, a subject and bodies, the
//! [`EmailSenderProvider`] resolves the theme's attachments, builds a
//! `multipart/mixed` message and delivers it to the user over SMTP, in
//! plain text, with STARTTLS or with implicit TLS.
//!
//! The collaborators are capabilities supplied by the caller:
//! - [`Theme`]: static resources and the `attachments` property
//! - [`EmailAddressSource`]: the address of the user being notified
//! - [`TrustProvider`]: TLS trust anchors and hostname verification policy
//!
//! ## Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use courier_core::{DefaultTrust, DirectoryTheme, EmailSenderProvider};
//!
//! # async fn run() -> courier_core::Result<()> {
//! let sender = EmailSenderProvider::new(
//!     Arc::new(DirectoryTheme::new("themes/base/email")),
//!     Arc::new(DefaultTrust),
//! );
//!
//! let config = HashMap::from([
//!     ("host".to_string(), "smtp.example.com".to_string()),
//!     ("starttls".to_string(), "true".to_string()),
//!     ("from".to_string(), "no-reply@example.com".to_string()),
//! ]);
//!
//! sender
//!     .send(&config, "bob@example.com", "Reset", Some("reset your password"), None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod attachment;
pub mod compose;
pub mod config;
mod error;
pub mod sender;
pub mod theme;
pub mod transport;
pub mod trust;
pub mod user;

pub use attachment::{AttachmentError, AttachmentSource};
pub use compose::{Content, Envelope};
pub use config::{ConfigError, Security, TransportConfig};
pub use error::{EmailError, Result};
pub use sender::{EmailSenderProvider, SendRequest};
pub use theme::{DirectoryTheme, MemoryTheme, Theme};
pub use transport::{Credentials, TransportSession};
pub use trust::{
    DefaultTrust, HostnameVerificationPolicy, PemTruststore, TrustError, TrustMaterial,
    TrustProvider,
};
pub use user::EmailAddressSource;
