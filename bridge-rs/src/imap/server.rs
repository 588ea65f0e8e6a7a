//! IMAP server
//!
//! Accepts TCP connections, runs the per-connection session loop, and
//! owns the two stream-level concerns the session cannot do alone:
//! collecting APPEND literals and upgrading the socket for STARTTLS.

use crate::account::AccountRegistry;
use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::imap::session::{ImapSession, SessionAction};
use crate::security::{Authenticator, TlsConfig};
use crate::stream::MailStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Timeout for reading a command line
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300); // 5 minutes

/// Timeout for reading an APPEND literal
const APPEND_TIMEOUT: Duration = Duration::from_secs(600); // 10 minutes

/// Maximum command line length
const MAX_LINE_LENGTH: usize = 8192;

enum SessionResult {
    /// Restart the read loop on the (possibly upgraded) stream
    Continue,
    Quit,
}

pub struct ImapServer {
    config: Arc<Config>,
    accounts: Arc<AccountRegistry>,
    authenticator: Arc<Authenticator>,
    tls: Option<TlsConfig>,
}

impl ImapServer {
    pub fn new(
        config: Arc<Config>,
        accounts: Arc<AccountRegistry>,
        authenticator: Arc<Authenticator>,
        tls: Option<TlsConfig>,
    ) -> Self {
        Self { config, accounts, authenticator, tls }
    }

    /// Bind the configured listeners and serve until the task is dropped.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.imap.listen_addr).await?;
        info!("🌐 IMAP server listening on {}", self.config.imap.listen_addr);

        if let (Some(_), Some(addr)) = (&self.tls, &self.config.imap.tls_listen_addr) {
            let tls_listener = TcpListener::bind(addr).await?;
            info!("🔐 IMAPS server listening on {}", addr);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = server.serve(tls_listener, true).await {
                    error!("IMAPS listener error: {}", e);
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
                    info!("📨 New IMAP connection from {}", addr);
                    let config = Arc::clone(&self.config);
                    let accounts = Arc::clone(&self.accounts);
                    let authenticator = Arc::clone(&self.authenticator);
                    let tls = self.tls.clone();

                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(socket, config, accounts, authenticator, tls, implicit_tls)
                                .await
                        {
                            error!("IMAP session error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept IMAP connection: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    config: Arc<Config>,
    accounts: Arc<AccountRegistry>,
    authenticator: Arc<Authenticator>,
    tls: Option<TlsConfig>,
    implicit_tls: bool,
) -> Result<()> {
    let peer_addr = socket.peer_addr()?;

    let mut stream = if implicit_tls {
        let tls = tls.as_ref().ok_or_else(|| {
            BridgeError::Tls("implicit TLS listener without TLS config".to_string())
        })?;
        MailStream::Tls(tls.acceptor().accept(socket).await?)
    } else {
        MailStream::Plain(socket)
    };

    let starttls_available = tls.is_some() && !implicit_tls;
    let mut session =
        ImapSession::new(&config, accounts, authenticator, starttls_available, implicit_tls);

    stream.write_all(session.greeting().as_bytes()).await?;

    // The loop restarts after a STARTTLS upgrade so the buffered reader
    // is rebuilt on top of the encrypted stream.
    loop {
        match process_lines(&mut session, &mut stream, tls.as_ref()).await? {
            SessionResult::Continue => continue,
            SessionResult::Quit => break,
        }
    }

    info!("IMAP connection from {} closed", peer_addr);
    Ok(())
}

async fn process_lines(
    session: &mut ImapSession,
    stream: &mut MailStream,
    tls: Option<&TlsConfig>,
) -> Result<SessionResult> {
    // Reborrow so the reader can be dropped to regain the stream for
    // the TLS upgrade.
    let mut buf_reader = BufReader::new(&mut *stream);
    let mut line = String::new();

    loop {
        line.clear();

        // An idling client parks the connection until it sends DONE;
        // only regular commands are subject to the read timeout.
        let n = if session.is_idle() {
            match buf_reader.read_line(&mut line).await {
                Ok(n) => n,
                Err(e) => {
                    error!("IO error reading line: {}", e);
                    return Err(e.into());
                }
            }
        } else {
            match timeout(COMMAND_TIMEOUT, buf_reader.read_line(&mut line)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error reading line: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Command timeout, disconnecting");
                    buf_reader
                        .write_all(b"* BYE Timeout, closing connection\r\n")
                        .await?;
                    return Ok(SessionResult::Quit);
                }
            }
        };

        if n == 0 {
            debug!("Client disconnected");
            return Ok(SessionResult::Quit);
        }

        if line.len() > MAX_LINE_LENGTH {
            error!("Line too long: {} bytes", line.len());
            buf_reader.write_all(b"* BAD Line too long\r\n").await?;
            continue;
        }

        debug!("Received: {}", line.trim_end());

        let reply = session.handle_line(&line).await;
        if !reply.data.is_empty() {
            buf_reader.write_all(&reply.data).await?;
        }

        match reply.action {
            None => {}
            Some(SessionAction::Logout) => return Ok(SessionResult::Quit),
            Some(SessionAction::StartTls) => {
                // Drop the reader to regain the stream. Pipelined bytes
                // after STARTTLS are discarded, which RFC 3501 permits.
                drop(buf_reader);
                let tls = tls.ok_or_else(|| {
                    BridgeError::Tls("STARTTLS accepted without TLS config".to_string())
                })?;
                stream.upgrade(tls).await?;
                session.reset_after_tls();
                info!("STARTTLS upgrade completed, restarting session");
                return Ok(SessionResult::Continue);
            }
            Some(SessionAction::CollectAppend(pending)) => {
                // The literal rides the same buffered reader; pipelined
                // clients may already have sent part of it.
                let mut raw = vec![0u8; pending.size];
                match timeout(APPEND_TIMEOUT, buf_reader.read_exact(&mut raw)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        error!("IO error reading APPEND literal: {}", e);
                        return Err(e.into());
                    }
                    Err(_) => {
                        warn!("APPEND literal timeout, disconnecting");
                        buf_reader
                            .write_all(b"* BYE Timeout, closing connection\r\n")
                            .await?;
                        return Ok(SessionResult::Quit);
                    }
                }

                // Consume the CRLF that terminates the APPEND command.
                let mut rest = String::new();
                if let Ok(Err(e)) =
                    timeout(COMMAND_TIMEOUT, buf_reader.read_line(&mut rest)).await
                {
                    error!("IO error after APPEND literal: {}", e);
                    return Err(e.into());
                }

                let reply = session.finish_append(pending, raw).await;
                buf_reader.write_all(&reply.data).await?;
            }
        }
    }
}
