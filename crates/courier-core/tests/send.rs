//! End-to-end tests for `EmailSenderProvider`.
//!
//! Each test runs a fake SMTP server on a loopback socket that answers
//! client lines with scripted replies and records the transcript.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader as StdBufReader;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{
    DefaultTrust, EmailError, EmailSenderProvider, HostnameVerificationPolicy, MemoryTheme,
    PemTruststore, Theme, TrustProvider,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_test::{assert_err, assert_ok};

const CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/relay.pem");
const KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/relay.key");

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

const EHLO_AUTH: &str = "250-mx.example.com\r\n250 AUTH PLAIN LOGIN\r\n";
const ACCEPT_ALL: [&str; 6] = [
    EHLO_AUTH,
    "235 2.7.0 Authentication successful\r\n",
    "250 OK\r\n",
    "250 OK\r\n",
    "354 Go ahead\r\n",
    "250 Queued\r\n",
];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("courier_core=debug,courier_smtp=trace")
        .with_test_writer()
        .try_init();
}

/// Plays `replies` to the client on `socket`; see the module docs.
async fn serve<S>(socket: S, replies: Vec<&'static str>) -> Vec<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(socket);
    let mut reader = BufReader::new(read);
    let mut transcript = Vec::new();

    write.write_all(b"220 mx.example.com ESMTP\r\n").await.unwrap();

    let mut replies = replies.into_iter().chain(std::iter::once("221 Bye\r\n"));
    while let Some(reply) = replies.next() {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            break;
        }
        transcript.push(line.trim_end().to_string());
        write.write_all(reply.as_bytes()).await.unwrap();

        if reply.starts_with("354") {
            loop {
                let mut data = String::new();
                reader.read_line(&mut data).await.unwrap();
                let data = data.trim_end().to_string();
                let done = data == ".";
                transcript.push(data);
                if done {
                    break;
                }
            }
            if let Some(reply) = replies.next() {
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        }
    }
    transcript
}

async fn plain_server(replies: Vec<&'static str>) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        serve(socket, replies).await
    });
    (port, handle)
}

/// Implicit TLS server presenting the `mail.internal` fixture certificate.
async fn tls_server(replies: Vec<&'static str>) -> (u16, JoinHandle<Vec<String>>) {
    let certs = rustls_pemfile::certs(&mut StdBufReader::new(File::open(CERT).unwrap()))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut StdBufReader::new(File::open(KEY).unwrap()))
        .unwrap()
        .unwrap();
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        match acceptor.accept(socket).await {
            Ok(stream) => serve(stream, replies).await,
            Err(_) => Vec::new(),
        }
    });
    (port, handle)
}

fn config(port: u16, extra: &[(&str, &str)]) -> HashMap<String, String> {
    let mut config: HashMap<String, String> = [
        ("host", "127.0.0.1"),
        ("from", "no-reply@example.com"),
        ("timeout", "5000"),
    ]
    .iter()
    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
    .collect();
    config.insert("port".into(), port.to_string());
    for (k, v) in extra {
        config.insert((*k).to_string(), (*v).to_string());
    }
    config
}

fn credentials() -> [(&'static str, &'static str); 3] {
    [("auth", "true"), ("user", "alice"), ("password", "secret")]
}

fn logo_theme() -> Arc<dyn Theme> {
    Arc::new(
        MemoryTheme::new()
            .with_resource("img/logo.png", PNG)
            .with_property("attachments", "img/logo.png, img/missing.gif"),
    )
}

fn sender(theme: Arc<dyn Theme>, trust: Arc<dyn TrustProvider>) -> EmailSenderProvider {
    init_tracing();
    EmailSenderProvider::new(theme, trust)
}

#[tokio::test]
async fn test_authenticated_delivery_with_attachment() {
    let (port, server) = plain_server(ACCEPT_ALL.to_vec()).await;
    let sender = sender(logo_theme(), Arc::new(DefaultTrust));

    assert_ok!(
        sender
            .send(
                &config(port, &credentials()),
                "bob@example.com",
                "Reset",
                Some("reset your password"),
                None,
            )
            .await
    );

    let transcript = server.await.unwrap();
    assert_eq!(transcript[0], "EHLO localhost");
    assert_eq!(transcript[1], "AUTH PLAIN AGFsaWNlAHNlY3JldA==");
    assert_eq!(transcript[2], "MAIL FROM:<no-reply@example.com>");
    assert_eq!(transcript[3], "RCPT TO:<bob@example.com>");
    assert_eq!(transcript[4], "DATA");
    assert_eq!(transcript.last().unwrap(), "QUIT");

    assert!(transcript.iter().any(|l| l == "To: bob@example.com"));
    assert!(transcript.iter().any(|l| l.starts_with("Content-Type: text/plain")));
    assert!(!transcript.iter().any(|l| l.starts_with("Content-Type: text/html")));
    let dispositions: Vec<_> = transcript
        .iter()
        .filter(|l| l.starts_with("Content-Disposition: attachment"))
        .collect();
    assert_eq!(dispositions, ["Content-Disposition: attachment; filename=\"logo.png\""]);
}

#[tokio::test]
async fn test_envelope_sender_and_size() {
    let (port, server) = plain_server(vec![
        "250-mx.example.com\r\n250 SIZE 1000000\r\n",
        "250 OK\r\n",
        "250 OK\r\n",
        "354 Go ahead\r\n",
        "250 Queued\r\n",
    ])
    .await;
    let sender = sender(Arc::new(MemoryTheme::new()), Arc::new(DefaultTrust));

    assert_ok!(
        sender
            .send(
                &config(port, &[("envelopeFrom", "bounces@example.com")]),
                "bob@example.com",
                "Reset",
                Some("text"),
                Some("<p>html</p>"),
            )
            .await
    );

    let transcript = server.await.unwrap();
    assert!(transcript[1].starts_with("MAIL FROM:<bounces@example.com> SIZE="));
    assert!(transcript.iter().any(|l| l == "From: no-reply@example.com"));
}

#[tokio::test]
async fn test_missing_attachments_property_sends_without_attachments() {
    let (port, server) = plain_server(ACCEPT_ALL.to_vec()).await;
    let theme = Arc::new(MemoryTheme::new().with_resource("img/logo.png", PNG));
    let sender = sender(theme, Arc::new(DefaultTrust));

    assert_ok!(
        sender
            .send(&config(port, &credentials()), "bob@example.com", "Reset", Some("hi"), None)
            .await
    );

    let transcript = server.await.unwrap();
    assert!(!transcript.iter().any(|l| l.starts_with("Content-Disposition")));
}

#[tokio::test]
async fn test_empty_recipient_opens_no_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let sender = sender(logo_theme(), Arc::new(DefaultTrust));

    let err = assert_err!(
        sender
            .send(&config(port, &credentials()), "", "Reset", Some("hi"), None)
            .await
    );
    assert!(matches!(err, EmailError::InvalidAddress { field: "recipient", .. }));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), listener.accept())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_rejected_recipient() {
    let (port, server) = plain_server(vec![
        EHLO_AUTH,
        "235 2.7.0 Authentication successful\r\n",
        "250 OK\r\n",
        "550 5.1.1 No such user\r\n",
    ])
    .await;
    let sender = sender(logo_theme(), Arc::new(DefaultTrust));

    let err = assert_err!(
        sender
            .send(&config(port, &credentials()), "bob@example.com", "Reset", Some("hi"), None)
            .await
    );
    let EmailError::Transmission(source) = err else {
        panic!("expected a transmission error, got {err:?}");
    };
    assert!(source.is_permanent());

    // The connection was released without QUIT.
    let transcript = server.await.unwrap();
    assert_eq!(transcript.last().unwrap(), "RCPT TO:<bob@example.com>");
}

#[tokio::test]
async fn test_rejected_credentials() {
    let (port, server) = plain_server(vec![
        EHLO_AUTH,
        "535 5.7.8 Authentication credentials invalid\r\n",
    ])
    .await;
    let sender = sender(logo_theme(), Arc::new(DefaultTrust));

    let err = assert_err!(
        sender
            .send(&config(port, &credentials()), "bob@example.com", "Reset", Some("hi"), None)
            .await
    );
    assert!(matches!(err, EmailError::Authentication { source: Some(_), .. }));
    assert_eq!(server.await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_starttls_required_when_configured() {
    let (port, _server) = plain_server(vec!["250 mx.example.com\r\n"]).await;
    let sender = sender(logo_theme(), Arc::new(DefaultTrust));

    let err = assert_err!(
        sender
            .send(&config(port, &[("starttls", "true")]), "bob@example.com", "Reset", Some("hi"), None)
            .await
    );
    let EmailError::TransportConnect { source, .. } = err else {
        panic!("expected a connect error, got {err:?}");
    };
    assert!(matches!(source, courier_smtp::Error::NotSupported(_)));
}

#[tokio::test]
async fn test_refused_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let sender = sender(logo_theme(), Arc::new(DefaultTrust));

    let err = assert_err!(
        sender
            .send(&config(port, &[]), "bob@example.com", "Reset", Some("hi"), None)
            .await
    );
    assert!(matches!(err, EmailError::TransportConnect { .. }));
}

#[tokio::test]
async fn test_implicit_tls_with_any_hostname_policy() {
    let (port, server) = tls_server(ACCEPT_ALL.to_vec()).await;
    // The certificate names mail.internal; we connect to 127.0.0.1.
    let trust = PemTruststore::new(CERT).with_policy(HostnameVerificationPolicy::Any);
    let sender = sender(logo_theme(), Arc::new(trust));

    let mut extra = credentials().to_vec();
    extra.push(("ssl", "true"));
    assert_ok!(
        sender
            .send(&config(port, &extra), "bob@example.com", "Reset", Some("reset your password"), None)
            .await
    );

    let transcript = server.await.unwrap();
    assert_eq!(transcript[1], "AUTH PLAIN AGFsaWNlAHNlY3JldA==");
    assert_eq!(transcript[3], "RCPT TO:<bob@example.com>");
    assert_eq!(transcript.last().unwrap(), "QUIT");
}

#[tokio::test]
async fn test_implicit_tls_strict_policy_rejects_name_mismatch() {
    let (port, server) = tls_server(ACCEPT_ALL.to_vec()).await;
    let sender = sender(logo_theme(), Arc::new(PemTruststore::new(CERT)));

    let err = assert_err!(
        sender
            .send(&config(port, &[("ssl", "true")]), "bob@example.com", "Reset", Some("hi"), None)
            .await
    );
    assert!(matches!(err, EmailError::TransportConnect { .. }));
    assert!(server.await.unwrap().is_empty());
}
