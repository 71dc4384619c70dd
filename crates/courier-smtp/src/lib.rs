//! # courier-smtp
//!
//! An SMTP submission client implementing the subset of RFC 5321 needed to
//! hand one message to a relay.
//!
//! ## Features
//!
//! - **Type-state connection management**: Compile-time enforcement of valid
//!   SMTP state transitions
//! - **TLS**: implicit TLS (port 465) and STARTTLS, with an injectable
//!   `rustls` client configuration
//! - **Authentication**: PLAIN, or LOGIN when PLAIN is not offered
//! - **Timeouts**: bounded connect and per-read/write deadlines
//! - **Extensions**: SIZE checking before the transaction starts
//!
//! ## Quick Start
//!
//! ```ignore
//! use courier_smtp::{Address, Client, Timeouts};
//! use courier_smtp::connection::connect;
//!
//! #[tokio::main]
//! async fn main() -> courier_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 587, Timeouts::default()).await?;
//!     let client = Client::from_stream(stream).await?;
//!
//!     let client = client.ehlo("client.example.com").await?;
//!     let client = client.starttls("smtp.example.com", None).await?;
//!     let client = client.authenticate("user@example.com", "password").await?;
//!
//!     let message = b"Subject: Test\r\n\r\nHello, World!\r\n";
//!     let from = Address::new("sender@example.com")?;
//!     let to = Address::new("recipient@example.com")?;
//!
//!     let client = client.mail_from(from, Some(message.len())).await?;
//!     let client = client.rcpt_to(to).await?;
//!     let client = client.data().await?;
//!     let client = client.send_message(message).await?;
//!
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌──────────────┐
//! │  Connected   │ ─── authenticate() ───→ Authenticated
//! └──────────────┘                              │
//!        │                                      │
//!        └──────────── mail_from() ─────────────┘
//!                          │
//!                          ↓
//!               MailTransaction ─ rcpt_to() → RecipientAdded ─ data() → Data
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod tls;
pub mod types;

pub use connection::{
    Authenticated, Client, Connected, Data, MailTransaction, RecipientAdded, ServerInfo,
    SmtpConnection, Timeouts,
};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
