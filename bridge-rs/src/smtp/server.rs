//! SMTP server
//!
//! Accepts TCP connections and hands each one to an [`SmtpSession`].
//! The optional second listener serves implicit TLS (SMTPS).

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::security::{Authenticator, TlsConfig};
use crate::smtp::session::SmtpSession;
use crate::store::{MailRelay, ObjectStore};
use crate::stream::MailStream;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

pub struct SmtpServer {
    config: Arc<Config>,
    store: Arc<dyn ObjectStore>,
    relay: Arc<dyn MailRelay>,
    authenticator: Arc<Authenticator>,
    tls: Option<TlsConfig>,
}

impl SmtpServer {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ObjectStore>,
        relay: Arc<dyn MailRelay>,
        authenticator: Arc<Authenticator>,
        tls: Option<TlsConfig>,
    ) -> Self {
        Self { config, store, relay, authenticator, tls }
    }

    /// Bind the configured listeners and serve until the task is dropped.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.smtp.listen_addr).await?;
        info!("🌐 SMTP server listening on {}", self.config.smtp.listen_addr);

        if let (Some(_), Some(addr)) = (&self.tls, &self.config.smtp.tls_listen_addr) {
            let tls_listener = TcpListener::bind(addr).await?;
            info!("🔐 SMTPS server listening on {}", addr);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.serve(tls_listener, true).await {
                    error!("SMTPS listener error: {}", e);
                }
            });
        }

        self.serve(listener, false).await
    }

    /// Accept loop for one listener. `implicit_tls` runs the handshake
    /// before the greeting instead of waiting for STARTTLS.
    pub async fn serve(&self, listener: TcpListener, implicit_tls: bool) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("📨 New SMTP connection from {}", addr);

                    let session = SmtpSession::new(
                        &self.config,
                        Arc::clone(&self.store),
                        Arc::clone(&self.relay),
                        Arc::clone(&self.authenticator),
                        self.tls.clone(),
                    );
                    let tls = self.tls.clone();

                    tokio::spawn(async move {
                        if let Err(e) = run_session(session, socket, tls, implicit_tls).await {
                            error!("SMTP session error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept SMTP connection: {}", e);
                }
            }
        }
    }
}

async fn run_session(
    session: SmtpSession,
    socket: TcpStream,
    tls: Option<TlsConfig>,
    implicit_tls: bool,
) -> Result<()> {
    let stream = if implicit_tls {
        let tls = tls.as_ref().ok_or_else(|| {
            BridgeError::Tls("implicit TLS listener without TLS config".to_string())
        })?;
        MailStream::Tls(tls.acceptor().accept(socket).await?)
    } else {
        MailStream::Plain(socket)
    };

    session.handle(stream).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;
    use crate::store::{InMemoryRelay, InMemoryStore};
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    async fn spawn_server() -> (std::net::SocketAddr, Arc<InMemoryStore>, Arc<InMemoryRelay>) {
        let mut config = Config::default();
        config.server.domain = "test.example.com".to_string();
        config.users.insert(
            "chris".to_string(),
            UserConfig {
                password: "test-password-123".to_string(),
                email: "chris@test.example.com".to_string(),
            },
        );
        let store = Arc::new(InMemoryStore::new());
        let relay = Arc::new(InMemoryRelay::new());
        let authenticator = Arc::new(Authenticator::from_config(&config));
        let server = Arc::new(SmtpServer::new(
            Arc::new(config),
            store.clone(),
            relay.clone(),
            authenticator,
            None,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener, false).await;
        });
        (addr, store, relay)
    }

    /// Read one SMTP reply, including all continuation lines.
    async fn read_reply(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
        let mut collected = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await.unwrap();
            assert!(n > 0, "connection closed mid-reply");
            collected.push_str(&line);
            // Continuation lines carry a dash after the code.
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                return collected;
            }
        }
    }

    #[tokio::test]
    async fn test_full_send_walk() {
        let (addr, store, relay) = spawn_server().await;

        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);

        let greeting = read_reply(&mut reader).await;
        assert!(greeting.starts_with("220 test.example.com ESMTP"), "greeting: {}", greeting);

        write_half.write_all(b"EHLO client.local\r\n").await.unwrap();
        let reply = read_reply(&mut reader).await;
        assert!(reply.contains("250-SIZE"));
        assert!(reply.contains("250-PIPELINING"));
        assert!(reply.ends_with("250 AUTH PLAIN LOGIN\r\n"));

        let blob = BASE64.encode(b"\0chris\0test-password-123");
        write_half
            .write_all(format!("AUTH PLAIN {}\r\n", blob).as_bytes())
            .await
            .unwrap();
        let reply = read_reply(&mut reader).await;
        assert!(reply.starts_with("235"), "auth: {}", reply);

        write_half
            .write_all(b"MAIL FROM:<chris@test.example.com>\r\n")
            .await
            .unwrap();
        assert!(read_reply(&mut reader).await.starts_with("250"));

        write_half
            .write_all(b"RCPT TO:<friend@example.org>\r\n")
            .await
            .unwrap();
        assert!(read_reply(&mut reader).await.starts_with("250"));

        write_half.write_all(b"DATA\r\n").await.unwrap();
        assert!(read_reply(&mut reader).await.starts_with("354"));

        write_half
            .write_all(b"Subject: hello\r\n\r\nbody text\r\n.\r\n")
            .await
            .unwrap();
        let reply = read_reply(&mut reader).await;
        assert!(reply.starts_with("250 OK: queued as "), "send: {}", reply);

        write_half.write_all(b"QUIT\r\n").await.unwrap();
        assert!(read_reply(&mut reader).await.starts_with("221"));

        let sent = relay.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].source, "chris@test.example.com");
        assert_eq!(sent[0].recipients, vec!["friend@example.org"]);
        assert_eq!(store.list("sent/").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mail_without_auth_rejected() {
        let (addr, _, relay) = spawn_server().await;

        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        read_reply(&mut reader).await;

        write_half.write_all(b"EHLO client.local\r\n").await.unwrap();
        read_reply(&mut reader).await;

        write_half
            .write_all(b"MAIL FROM:<chris@test.example.com>\r\n")
            .await
            .unwrap();
        let reply = read_reply(&mut reader).await;
        assert!(reply.starts_with("530"), "unauthenticated: {}", reply);
        assert!(relay.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_message_on_same_connection() {
        let (addr, _, relay) = spawn_server().await;

        let socket = TcpStream::connect(addr).await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        read_reply(&mut reader).await;

        write_half.write_all(b"EHLO client.local\r\n").await.unwrap();
        read_reply(&mut reader).await;

        let blob = BASE64.encode(b"\0chris\0test-password-123");
        write_half
            .write_all(format!("AUTH PLAIN {}\r\n", blob).as_bytes())
            .await
            .unwrap();
        read_reply(&mut reader).await;

        for n in 0..2 {
            write_half
                .write_all(b"MAIL FROM:<chris@test.example.com>\r\n")
                .await
                .unwrap();
            assert!(read_reply(&mut reader).await.starts_with("250"), "message {}", n);
            write_half
                .write_all(b"RCPT TO:<friend@example.org>\r\n")
                .await
                .unwrap();
            read_reply(&mut reader).await;
            write_half.write_all(b"DATA\r\n").await.unwrap();
            read_reply(&mut reader).await;
            write_half
                .write_all(format!("Subject: m{}\r\n\r\nbody\r\n.\r\n", n).as_bytes())
                .await
                .unwrap();
            assert!(read_reply(&mut reader).await.starts_with("250"));
        }

        assert_eq!(relay.sent().await.len(), 2);
    }
}
