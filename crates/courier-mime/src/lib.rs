//! # courier-mime
//!
//! MIME model and builder for outgoing notification email.
//!
//! ## Features
//!
//! - **Message generation**: `multipart/mixed` envelopes with a
//!   `multipart/alternative` text/HTML body and binary attachments
//! - **Encoding/Decoding**: Base64, Quoted-Printable, RFC 2047 header encoding
//! - **Content types**: parameters, boundaries and content sniffing for
//!   opaque attachment streams
//! - **Mailboxes**: validated addresses with UTF-8 display names
//!
//! ## Quick Start
//!
//! ```ignore
//! use courier_mime::{Attachment, ContentType, Mailbox, MessageBuilder};
//!
//! let message = MessageBuilder::new()
//!     .from(Mailbox::new("no-reply@example.com", Some("Example"))?)
//!     .to("bob@example.com")
//!     .subject("Reset your password")
//!     .text_body("Follow the link to reset your password.")
//!     .html_body("<p>Follow the <a href=\"#\">link</a>.</p>")
//!     .attach(Attachment::new("logo.png", ContentType::new("image", "png"), logo))
//!     .build()?;
//!
//! let wire = message.to_bytes();
//! ```
//!
//! ### Content sniffing
//!
//! ```ignore
//! use courier_mime::ContentType;
//!
//! let ct = ContentType::sniff(b"%PDF-1.7", "terms.pdf");
//! assert!(ct.is("application", "pdf"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod address;
mod builder;
mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use address::{Mailbox, validate_address};
pub use builder::{Attachment, MessageBuilder};
pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Body, Message, Part, TransferEncoding};
