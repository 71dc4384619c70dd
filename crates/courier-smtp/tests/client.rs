//! Integration tests for the SMTP client.
//!
//! These tests run a scripted server on a loopback socket: it sends a
//! greeting, then answers each client line with the next scripted reply and
//! records everything the client wrote.

#![allow(clippy::unwrap_used)]

use courier_smtp::connection::connect;
use courier_smtp::{Address, Client, Error, SmtpConnection, Timeouts};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Spawns a server that plays `replies` in order and returns its port and
/// the transcript of client lines.
///
/// After a `354` reply the server reads message data up to the lone `.`
/// line and answers it with the following reply.
async fn scripted_server(replies: Vec<&'static str>) -> (u16, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut transcript = Vec::new();

        write.write_all(b"220 mx.example.com ESMTP\r\n").await.unwrap();

        let mut replies = replies.into_iter();
        while let Some(reply) = replies.next() {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
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
    });

    (port, handle)
}

async fn client(port: u16) -> Client<courier_smtp::Connected> {
    let stream = connect("127.0.0.1", port, Timeouts::default()).await.unwrap();
    Client::from_stream(stream).await.unwrap()
}

#[tokio::test]
async fn test_full_transaction_with_auth_plain() {
    let (port, server) = scripted_server(vec![
        "250-mx.example.com\r\n250-SIZE 1000\r\n250 AUTH PLAIN LOGIN\r\n",
        "235 2.7.0 Authentication successful\r\n",
        "250 OK\r\n",
        "250 OK\r\n",
        "354 Go ahead\r\n",
        "250 Queued\r\n",
        "221 Bye\r\n",
    ])
    .await;

    let message = b"Subject: Hi\r\n\r\n.hidden\r\n";
    let client = client(port).await.ehlo("client.test").await.unwrap();
    assert!(client.server_info().esmtp);
    assert!(!client.is_encrypted());

    let client = client.authenticate("alice", "secret").await.unwrap();
    let client = client
        .mail_from(Address::new("no-reply@example.com").unwrap(), Some(message.len()))
        .await
        .unwrap();
    let client = client
        .rcpt_to(Address::new("bob@example.com").unwrap())
        .await
        .unwrap();
    let client = client.data().await.unwrap();
    let client = client.send_message(message).await.unwrap();
    client.quit().await.unwrap();

    let transcript = server.await.unwrap();
    assert_eq!(
        transcript,
        vec![
            "EHLO client.test",
            "AUTH PLAIN AGFsaWNlAHNlY3JldA==",
            "MAIL FROM:<no-reply@example.com> SIZE=24",
            "RCPT TO:<bob@example.com>",
            "DATA",
            "Subject: Hi",
            "",
            "..hidden",
            ".",
            "QUIT",
        ]
    );
}

#[tokio::test]
async fn test_auth_login_when_plain_not_offered() {
    let (port, server) = scripted_server(vec![
        "250-mx.example.com\r\n250 AUTH LOGIN\r\n",
        "334 VXNlcm5hbWU6\r\n",
        "334 UGFzc3dvcmQ6\r\n",
        "235 OK\r\n",
    ])
    .await;

    let client = client(port).await.ehlo("client.test").await.unwrap();
    client.authenticate("alice", "secret").await.unwrap();

    let transcript = server.await.unwrap();
    assert_eq!(
        transcript,
        vec!["EHLO client.test", "AUTH LOGIN", "YWxpY2U=", "c2VjcmV0"]
    );
}

#[tokio::test]
async fn test_auth_plain_when_nothing_advertised() {
    let (port, server) = scripted_server(vec![
        "250-mx.example.com\r\n250 SIZE 1000\r\n",
        "235 2.7.0 Authentication successful\r\n",
    ])
    .await;

    let client = client(port).await.ehlo("client.test").await.unwrap();
    assert!(!client.server_info().advertises_auth());
    client.authenticate("alice", "secret").await.unwrap();

    let transcript = server.await.unwrap();
    assert_eq!(
        transcript,
        vec!["EHLO client.test", "AUTH PLAIN AGFsaWNlAHNlY3JldA=="]
    );
}

#[tokio::test]
async fn test_unadvertised_auth_refused_by_server() {
    let (port, _server) = scripted_server(vec![
        "250 mx.example.com\r\n",
        "502 5.5.1 AUTH not available\r\n",
    ])
    .await;

    let client = client(port).await.ehlo("client.test").await.unwrap();
    let err = client.authenticate("alice", "secret").await.unwrap_err();
    assert!(matches!(err, Error::SmtpError { code: 502, .. }));
}

#[tokio::test]
async fn test_helo_fallback() {
    let (port, server) = scripted_server(vec![
        "502 EHLO not implemented\r\n",
        "250 mx.example.com\r\n",
        "250 OK\r\n",
    ])
    .await;

    let client = client(port).await.ehlo("client.test").await.unwrap();
    assert!(!client.server_info().esmtp);

    // No SIZE extension: the SIZE parameter is omitted.
    client
        .mail_from(Address::new("a@example.com").unwrap(), Some(10))
        .await
        .unwrap();

    let transcript = server.await.unwrap();
    assert_eq!(
        transcript,
        vec!["EHLO client.test", "HELO client.test", "MAIL FROM:<a@example.com>"]
    );
}

#[tokio::test]
async fn test_rejected_credentials() {
    let (port, _server) = scripted_server(vec![
        "250-mx.example.com\r\n250 AUTH PLAIN\r\n",
        "535 5.7.8 Authentication credentials invalid\r\n",
    ])
    .await;

    let client = client(port).await.ehlo("client.test").await.unwrap();
    let err = client.authenticate("alice", "wrong").await.unwrap_err();
    assert!(matches!(err, Error::SmtpError { code: 535, .. }));
    assert!(err.is_permanent());
}

#[tokio::test]
async fn test_recipient_rejected() {
    let (port, _server) = scripted_server(vec![
        "250 mx.example.com\r\n",
        "250 OK\r\n",
        "550 5.1.1 No such user\r\n",
    ])
    .await;

    let client = client(port).await.ehlo("client.test").await.unwrap();
    let client = client
        .mail_from(Address::new("a@example.com").unwrap(), None)
        .await
        .unwrap();
    let err = client
        .rcpt_to(Address::new("nobody@example.com").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SmtpError { code: 550, .. }));
}

#[tokio::test]
async fn test_message_too_large_before_mail_from() {
    let (port, server) =
        scripted_server(vec!["250-mx.example.com\r\n250 SIZE 100\r\n"]).await;

    let client = client(port).await.ehlo("client.test").await.unwrap();
    let err = client
        .mail_from(Address::new("a@example.com").unwrap(), Some(101))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MessageTooLarge { size: 101, limit: 100 }));

    let transcript = server.await.unwrap();
    assert_eq!(transcript, vec!["EHLO client.test"]);
}

#[tokio::test]
async fn test_starttls_requires_advertisement() {
    let (port, _server) = scripted_server(vec!["250 mx.example.com\r\n"]).await;

    let client = client(port).await.ehlo("client.test").await.unwrap();
    let err = client.starttls("localhost", None).await.unwrap_err();
    assert!(matches!(err, Error::NotSupported(_)));
}

#[tokio::test]
async fn test_greeting_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(b"554 No SMTP service here\r\n")
            .await
            .unwrap();
    });

    let stream = connect("127.0.0.1", port, Timeouts::default()).await.unwrap();
    let err = Client::from_stream(stream).await.unwrap_err();
    assert!(matches!(err, Error::SmtpError { code: 554, .. }));
}
