//! Type-state SMTP client.

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rustls::ClientConfig;

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};

/// Type-state marker for connected state.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker for authenticated state.
#[derive(Debug)]
pub struct Authenticated;

/// Type-state marker for mail transaction started.
#[derive(Debug)]
pub struct MailTransaction;

/// Type-state marker for recipient accepted.
#[derive(Debug)]
pub struct RecipientAdded;

/// Type-state marker for data mode.
#[derive(Debug)]
pub struct Data;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    client_hostname: String,
    _state: PhantomData<State>,
}

/// Connection trait for all states.
pub trait SmtpConnection {
    /// Returns the server information.
    fn server_info(&self) -> &ServerInfo;

    /// Returns true if the connection is encrypted.
    fn is_encrypted(&self) -> bool;
}

impl<S> SmtpConnection for Client<S> {
    fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    fn is_encrypted(&self) -> bool {
        self.stream.is_tls()
    }
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or if the server returns an error.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream).await?.into_success()?;

        let hostname = greeting
            .message
            .first()
            .and_then(|msg| msg.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        tracing::debug!(server = %hostname, "Received SMTP greeting");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                esmtp: false,
                extensions: HashSet::new(),
            },
            client_hostname: String::new(),
            _state: PhantomData,
        })
    }

    /// Sends EHLO and discovers server capabilities, falling back to HELO
    /// when the server rejects EHLO with a permanent error.
    ///
    /// # Errors
    ///
    /// Returns an error if both greetings are refused.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        self.client_hostname = client_hostname.to_string();

        let reply = self
            .send_command(Command::Ehlo {
                hostname: client_hostname.to_string(),
            })
            .await?;

        if reply.code.is_permanent() {
            tracing::debug!(code = %reply.code, "EHLO refused, falling back to HELO");
            self.send_command(Command::Helo {
                hostname: client_hostname.to_string(),
            })
            .await?
            .into_success()?;
            self.server_info.esmtp = false;
            self.server_info.extensions.clear();
            return Ok(self);
        }

        let reply = reply.into_success()?;
        self.server_info.esmtp = true;
        self.server_info.extensions = parse_extensions(&reply);
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO.
    ///
    /// `tls_config` replaces the default strict web-roots configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not supported or if the upgrade fails.
    pub async fn starttls(
        mut self,
        server_name: &str,
        tls_config: Option<Arc<ClientConfig>>,
    ) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        self.send_command(Command::StartTls).await?.into_success()?;
        self.stream = self.stream.upgrade_to_tls(server_name, tls_config).await?;
        tracing::debug!(server = %server_name, "Connection upgraded to TLS");

        // Capabilities learned before the upgrade must be discarded.
        let client_hostname = self.client_hostname.clone();
        self.ehlo(&client_hostname).await
    }

    /// Authenticates with the best mechanism the server offers.
    ///
    /// PLAIN is used when advertised or when the server advertises no AUTH
    /// mechanisms at all; LOGIN otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if neither mechanism is available or the credentials
    /// are refused.
    pub async fn authenticate(
        self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let mechanisms = self.server_info.auth_mechanisms();
        if mechanisms.contains(&AuthMechanism::Plain) || !self.server_info.advertises_auth() {
            self.auth_plain(username, password).await
        } else if mechanisms.contains(&AuthMechanism::Login) {
            self.auth_login(username, password).await
        } else {
            Err(Error::NotSupported("AUTH PLAIN or LOGIN".into()))
        }
    }

    /// Authenticates using PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let credentials = format!("\0{username}\0{password}");
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(STANDARD.encode(credentials.as_bytes())),
        };

        self.send_command(cmd).await?.into_success()?;
        tracing::debug!(mechanism = "PLAIN", "Authenticated");
        Ok(self.transition())
    }

    /// Authenticates using LOGIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not prompt as expected or refuses
    /// the credentials.
    pub async fn auth_login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };
        let mut reply = self.send_command(cmd).await?;

        for secret in [username, password] {
            if reply.code != ReplyCode::AUTH_CONTINUE {
                return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
            }
            reply = self
                .send_command(Command::AuthResponse(STANDARD.encode(secret.as_bytes())))
                .await?;
        }

        reply.into_success()?;
        tracing::debug!(mechanism = "LOGIN", "Authenticated");
        Ok(self.transition())
    }

    /// Starts a mail transaction without authentication (if server allows).
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised SIZE limit or
    /// the MAIL FROM command fails.
    pub async fn mail_from(
        self,
        from: Address,
        size: Option<usize>,
    ) -> Result<Client<MailTransaction>> {
        self.begin_mail(from, size).await
    }
}

impl Client<Authenticated> {
    /// Starts a mail transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised SIZE limit or
    /// the MAIL FROM command fails.
    pub async fn mail_from(
        self,
        from: Address,
        size: Option<usize>,
    ) -> Result<Client<MailTransaction>> {
        self.begin_mail(from, size).await
    }
}

impl Client<MailTransaction> {
    /// Adds the recipient to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the RCPT TO command fails.
    pub async fn rcpt_to(mut self, to: Address) -> Result<Client<RecipientAdded>> {
        self.send_command(Command::RcptTo { to }).await?.into_success()?;
        Ok(self.transition())
    }
}

impl Client<RecipientAdded> {
    /// Begins sending message data.
    ///
    /// # Errors
    ///
    /// Returns an error if the DATA command fails.
    pub async fn data(mut self) -> Result<Client<Data>> {
        let reply = self.send_command(Command::Data).await?;

        if reply.code != ReplyCode::START_DATA {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        Ok(self.transition())
    }
}

impl Client<Data> {
    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// dot-stuffed and the terminating `.` line is appended.
    ///
    /// # Errors
    ///
    /// Returns an error if sending the message fails or server rejects it.
    pub async fn send_message(mut self, message: &[u8]) -> Result<Client<Connected>> {
        self.stream.write_all(&encode_data(message)).await?;

        let reply = read_reply(&mut self.stream).await?.into_success()?;
        tracing::debug!(reply = %reply.message_text(), "Message accepted");

        Ok(self.transition())
    }
}

// Common implementation for all states
impl<S> Client<S> {
    fn transition<T>(self) -> Client<T> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_hostname: self.client_hostname,
            _state: PhantomData,
        }
    }

    async fn send_command(&mut self, cmd: Command) -> Result<Reply> {
        tracing::trace!(command = %cmd.redacted(), "C:");
        self.stream.write_all(&cmd.serialize()).await?;
        read_reply(&mut self.stream).await
    }

    async fn begin_mail(
        mut self,
        from: Address,
        size: Option<usize>,
    ) -> Result<Client<MailTransaction>> {
        if let (Some(size), Some(limit)) = (size, self.server_info.max_message_size())
            && size > limit
        {
            return Err(Error::MessageTooLarge { size, limit });
        }

        let size = size.filter(|_| self.server_info.supports_size());
        self.send_command(Command::MailFrom { from, size })
            .await?
            .into_success()?;
        Ok(self.transition())
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(Command::Quit).await?;

        if !reply.is_success() {
            return Err(Error::smtp_error(reply.code.as_u16(), reply.message_text()));
        }

        // The server closes its side after 221; a failed shutdown changes nothing.
        if let Err(err) = self.stream.shutdown().await {
            tracing::trace!(error = %err, "Shutdown after QUIT failed");
        }
        Ok(())
    }
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        tracing::trace!(line = %line, "S:");
        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}

/// The first EHLO reply line is the server greeting; the rest are extensions.
fn parse_extensions(reply: &Reply) -> HashSet<Extension> {
    reply
        .message
        .iter()
        .skip(1)
        .map(|line| Extension::parse(line))
        .collect()
}

/// Normalizes line endings, dot-stuffs and terminates message data.
fn encode_data(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);

    let mut lines: Vec<&[u8]> = message.split(|&b| b == b'\n').collect();
    if message.is_empty() || message.ends_with(b"\n") {
        lines.pop();
    }

    for line in lines {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.first() == Some(&b'.') {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(b".\r\n");
    out
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
    fn test_encode_data_terminates() {
        assert_eq!(encode_data(b"Hello\r\n"), b"Hello\r\n.\r\n");
        assert_eq!(encode_data(b"Hello"), b"Hello\r\n.\r\n");
        assert_eq!(encode_data(b""), b".\r\n");
    }

    #[test]
    fn test_encode_data_normalizes_bare_lf() {
        assert_eq!(encode_data(b"a\nb\n"), b"a\r\nb\r\n.\r\n");
    }

    #[test]
    fn test_encode_data_dot_stuffing() {
        assert_eq!(
            encode_data(b"line\r\n.\r\n..two\r\n"),
            b"line\r\n..\r\n...two\r\n.\r\n"
        );
    }

    #[test]
    fn test_encode_data_keeps_blank_lines() {
        assert_eq!(
            encode_data(b"Subject: x\r\n\r\nbody\r\n"),
            b"Subject: x\r\n\r\nbody\r\n.\r\n"
        );
    }
}
