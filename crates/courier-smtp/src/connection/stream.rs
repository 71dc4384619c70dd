//! Low-level SMTP stream handling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::Timeouts;
use crate::error::{Error, Result};
use crate::tls::default_client_config;

/// Longest reply line accepted, terminator included.
///
/// RFC 5321 limits reply lines to 512 octets; servers exceeding that by a
/// wide margin are treated as broken.
pub const MAX_LINE_LEN: usize = 4096;

#[derive(Debug)]
enum Transport {
    Tcp(BufReader<TcpStream>),
    Tls(Box<BufReader<TlsStream<TcpStream>>>),
}

/// SMTP stream (TCP or TLS) with a per-operation I/O deadline.
#[derive(Debug)]
pub struct SmtpStream {
    transport: Transport,
    io_timeout: Duration,
}

impl SmtpStream {
    /// Returns true if the connection is encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.transport, Transport::Tls(_))
    }

    /// Reads a line from the stream, without its line terminator.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails, times out, the line exceeds
    /// [`MAX_LINE_LEN`] bytes or is not UTF-8, or the server closed the
    /// connection.
    pub async fn read_line(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        let read = match &mut self.transport {
            Transport::Tcp(reader) => {
                let mut limited = reader.take(MAX_LINE_LEN as u64);
                deadline(self.io_timeout, limited.read_until(b'\n', &mut buf)).await?
            }
            Transport::Tls(reader) => {
                let mut limited = reader.take(MAX_LINE_LEN as u64);
                deadline(self.io_timeout, limited.read_until(b'\n', &mut buf)).await?
            }
        };
        if read == 0 {
            return Err(Error::Protocol("Connection closed by server".into()));
        }
        if !buf.ends_with(b"\n") && buf.len() >= MAX_LINE_LEN {
            return Err(Error::Protocol(format!(
                "Reply line exceeds {MAX_LINE_LEN} bytes"
            )));
        }
        let line = String::from_utf8(buf)
            .map_err(|_| Error::Protocol("Reply line is not valid UTF-8".into()))?;
        Ok(line.trim_end().to_string())
    }

    /// Writes data to the stream and flushes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or times out.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.transport {
            Transport::Tcp(reader) => {
                let stream = reader.get_mut();
                deadline(self.io_timeout, async {
                    stream.write_all(data).await?;
                    stream.flush().await
                })
                .await
            }
            Transport::Tls(reader) => {
                let stream = reader.get_mut();
                deadline(self.io_timeout, async {
                    stream.write_all(data).await?;
                    stream.flush().await
                })
                .await
            }
        }
    }

    /// Upgrades a TCP stream to TLS.
    ///
    /// Uses `tls_config` when given, otherwise the bundled web roots with
    /// strict verification.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS handshake fails.
    pub async fn upgrade_to_tls(
        self,
        hostname: &str,
        tls_config: Option<Arc<ClientConfig>>,
    ) -> Result<Self> {
        let tcp_stream = match self.transport {
            Transport::Tcp(reader) => reader.into_inner(),
            Transport::Tls(_) => return Err(Error::Protocol("Already using TLS".into())),
        };

        let tls_stream = handshake(hostname, tcp_stream, tls_config, self.io_timeout).await?;
        Ok(Self {
            transport: Transport::Tls(Box::new(BufReader::new(tls_stream))),
            io_timeout: self.io_timeout,
        })
    }

    /// Shuts down the write half of the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        match &mut self.transport {
            Transport::Tcp(reader) => deadline(self.io_timeout, reader.get_mut().shutdown()).await,
            Transport::Tls(reader) => deadline(self.io_timeout, reader.get_mut().shutdown()).await,
        }
    }
}

/// Connects to an SMTP server over plain TCP.
///
/// # Errors
///
/// Returns an error if the connection fails or times out.
pub async fn connect(hostname: &str, port: u16, timeouts: Timeouts) -> Result<SmtpStream> {
    let stream = open(hostname, port, timeouts.connect).await?;
    Ok(SmtpStream {
        transport: Transport::Tcp(BufReader::new(stream)),
        io_timeout: timeouts.io,
    })
}

/// Connects to an SMTP server over TLS (implicit TLS on port 465).
///
/// # Errors
///
/// Returns an error if the connection or TLS handshake fails.
pub async fn connect_tls(
    hostname: &str,
    port: u16,
    tls_config: Option<Arc<ClientConfig>>,
    timeouts: Timeouts,
) -> Result<SmtpStream> {
    let tcp_stream = open(hostname, port, timeouts.connect).await?;
    let tls_stream = handshake(hostname, tcp_stream, tls_config, timeouts.connect).await?;
    Ok(SmtpStream {
        transport: Transport::Tls(Box::new(BufReader::new(tls_stream))),
        io_timeout: timeouts.io,
    })
}

async fn open(hostname: &str, port: u16, limit: Duration) -> Result<TcpStream> {
    tracing::debug!(%hostname, port, "Opening TCP connection");
    deadline(limit, TcpStream::connect((hostname, port))).await
}

async fn handshake(
    hostname: &str,
    tcp_stream: TcpStream,
    tls_config: Option<Arc<ClientConfig>>,
    limit: Duration,
) -> Result<TlsStream<TcpStream>> {
    let config = tls_config.unwrap_or_else(|| Arc::new(default_client_config()));
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from(hostname.to_string())?;

    tracing::debug!(%hostname, "Starting TLS handshake");
    deadline(limit, connector.connect(server_name, tcp_stream)).await
}

/// Runs an I/O future, failing with [`Error::Timeout`] after `limit`.
async fn deadline<T>(
    limit: Duration,
    fut: impl Future<Output = std::io::Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(limit))?
        .map_err(Error::from)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn timeouts(ms: u64) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(ms),
            io: Duration::from_millis(ms),
        }
    }

    #[tokio::test]
    async fn test_read_and_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"220 ready\r\n").await.unwrap();
            let mut buf = [0u8; 6];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut stream = connect("127.0.0.1", port, timeouts(2000)).await.unwrap();
        assert!(!stream.is_tls());
        assert_eq!(stream.read_line().await.unwrap(), "220 ready");
        stream.write_all(b"QUIT\r\n").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"QUIT\r\n");
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let mut stream = connect("127.0.0.1", port, timeouts(100)).await.unwrap();
        let err = stream.read_line().await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_closed_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut stream = connect("127.0.0.1", port, timeouts(2000)).await.unwrap();
        server.await.unwrap();
        let err = stream.read_line().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut reply = b"220 ".to_vec();
            reply.extend(std::iter::repeat_n(b'x', MAX_LINE_LEN * 2));
            socket.write_all(&reply).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut stream = connect("127.0.0.1", port, timeouts(2000)).await.unwrap();
        let err = stream.read_line().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref msg) if msg.contains("exceeds")));
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut reply = b"250 ".to_vec();
            reply.extend(std::iter::repeat_n(b'x', MAX_LINE_LEN - 6));
            reply.extend_from_slice(b"\r\n250 OK\r\n");
            socket.write_all(&reply).await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut stream = connect("127.0.0.1", port, timeouts(2000)).await.unwrap();
        assert_eq!(stream.read_line().await.unwrap().len(), MAX_LINE_LEN - 2);
        assert_eq!(stream.read_line().await.unwrap(), "250 OK");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(connect("127.0.0.1", port, timeouts(2000)).await.is_err());
    }
}
