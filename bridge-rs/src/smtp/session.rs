//! SMTP session state machine.
//!
//! One session per connection, consumed by [`handle`](SmtpSession::handle).
//! Accepted messages go out through the mail relay; a copy is archived
//! under `sent/` on a best-effort basis.

use crate::config::Config;
use crate::error::{BridgeError, Result};
use crate::security::{AuthMechanism, Authenticator, TlsConfig};
use crate::smtp::commands::SmtpCommand;
use crate::store::{MailRelay, ObjectStore};
use crate::stream::MailStream;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Maximum number of recipients per message (anti-spam)
const MAX_RECIPIENTS: usize = 100;

/// Maximum command line length (RFC 5321)
const MAX_LINE_LENGTH: usize = 1000;

/// Timeout for reading a command line
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300); // 5 minutes

/// Timeout for reading DATA content
const DATA_TIMEOUT: Duration = Duration::from_secs(600); // 10 minutes

/// Maximum number of errors before disconnecting
const MAX_ERRORS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
enum SmtpState {
    Fresh,
    Ready,
    Mail,
    Rcpt,
    Data,
}

enum SessionResult {
    /// Restart command processing (after a STARTTLS upgrade)
    Continue,
    Quit,
}

pub struct SmtpSession {
    state: SmtpState,
    from: Option<String>,
    to: Vec<String>,
    data: Vec<u8>,
    domain: String,
    store: Arc<dyn ObjectStore>,
    relay: Arc<dyn MailRelay>,
    authenticator: Arc<Authenticator>,
    tls_config: Option<TlsConfig>,
    max_message_size: usize,
    error_count: usize,
    is_encrypted: bool,
    authenticated_user: Option<String>,
}

impl SmtpSession {
    pub fn new(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        relay: Arc<dyn MailRelay>,
        authenticator: Arc<Authenticator>,
        tls_config: Option<TlsConfig>,
    ) -> Self {
        Self {
            state: SmtpState::Fresh,
            from: None,
            to: Vec::new(),
            data: Vec::new(),
            domain: config.server.domain.clone(),
            store,
            relay,
            authenticator,
            tls_config,
            max_message_size: config.smtp.max_message_size,
            error_count: 0,
            is_encrypted: false,
            authenticated_user: None,
        }
    }

    /// Handle an SMTP session, potentially upgrading to TLS mid-stream.
    pub async fn handle(mut self, mut stream: MailStream) -> Result<()> {
        self.is_encrypted = stream.is_tls();

        stream
            .write_all(format!("220 {} ESMTP Mail Server\r\n", self.domain).as_bytes())
            .await?;

        // Loop instead of recursing so STARTTLS can rebuild the reader
        // on the upgraded stream.
        loop {
            match self.process_commands(&mut stream).await? {
                SessionResult::Continue => continue,
                SessionResult::Quit => break,
            }
        }

        Ok(())
    }

    async fn process_commands(&mut self, stream: &mut MailStream) -> Result<SessionResult> {
        // Reborrow so the reader can be dropped when STARTTLS needs the
        // bare stream back.
        let mut buf_reader = BufReader::new(&mut *stream);
        let mut line = String::new();

        loop {
            if self.error_count >= MAX_ERRORS {
                warn!("Too many errors, disconnecting");
                buf_reader
                    .write_all(b"421 Too many errors, closing connection\r\n")
                    .await?;
                return Ok(SessionResult::Quit);
            }

            line.clear();

            let read_result = timeout(COMMAND_TIMEOUT, buf_reader.read_line(&mut line)).await;
            let n = match read_result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error reading line: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("Command timeout, disconnecting");
                    buf_reader
                        .write_all(b"421 Timeout, closing connection\r\n")
                        .await?;
                    return Ok(SessionResult::Quit);
                }
            };

            if n == 0 {
                debug!("Client disconnected");
                return Ok(SessionResult::Quit);
            }

            if line.len() > MAX_LINE_LENGTH {
                error!("Line too long: {} bytes", line.len());
                buf_reader.write_all(b"500 Line too long\r\n").await?;
                self.error_count += 1;
                continue;
            }

            let line_trimmed = line.trim_end();
            debug!("Received: {}", line_trimmed);

            match SmtpCommand::parse(line_trimmed) {
                Ok(cmd) => {
                    // STARTTLS swaps the socket, so it cannot go through
                    // the normal reply path.
                    if matches!(cmd, SmtpCommand::StartTls) {
                        drop(buf_reader);

                        match self.handle_starttls_upgrade(stream).await {
                            Ok(true) => {
                                info!("STARTTLS upgrade completed, restarting session");
                                return Ok(SessionResult::Continue);
                            }
                            Ok(false) => {
                                buf_reader = BufReader::new(&mut *stream);
                                continue;
                            }
                            Err(e) => {
                                error!("STARTTLS error: {}", e);
                                return Err(e);
                            }
                        }
                    }

                    // AUTH runs its own challenge/response exchange.
                    if let SmtpCommand::Auth(mechanism, initial_response) = cmd.clone() {
                        if let Err(e) =
                            self.handle_auth(&mechanism, initial_response, &mut buf_reader).await
                        {
                            error!("AUTH error: {}", e);
                            buf_reader.write_all(b"535 Authentication failed\r\n").await?;
                            self.error_count += 1;
                        }
                        continue;
                    }

                    match self.handle_command(cmd).await {
                        Ok(response) => {
                            buf_reader.write_all(response.as_bytes()).await?;

                            if response.starts_with("221") {
                                return Ok(SessionResult::Quit);
                            }

                            if self.state == SmtpState::Data {
                                if let Err(e) = self.receive_data(&mut buf_reader).await {
                                    error!("Error receiving data: {}", e);
                                    buf_reader
                                        .write_all(b"451 Error receiving message\r\n")
                                        .await?;
                                    self.reset_envelope();
                                    self.error_count += 1;
                                }
                            }
                        }
                        Err(e) => {
                            error!("Error handling command: {}", e);
                            buf_reader
                                .write_all(format!("451 {}\r\n", e).as_bytes())
                                .await?;
                            self.error_count += 1;
                        }
                    }
                }
                Err(e) => {
                    error!("Command parse error: {}", e);
                    buf_reader
                        .write_all(b"500 Syntax error, command unrecognized\r\n")
                        .await?;
                    self.error_count += 1;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: SmtpCommand) -> Result<String> {
        match (self.state.clone(), cmd) {
            (_, SmtpCommand::Helo(domain)) => {
                info!("HELO from {}", domain);
                self.reset_envelope();
                Ok(format!("250 {} Hello {}\r\n", self.domain, domain))
            }
            (_, SmtpCommand::Ehlo(domain)) => {
                info!("EHLO from {}", domain);
                self.reset_envelope();

                let mut response = format!("250-{} Hello {}\r\n", self.domain, domain);
                response.push_str(&format!("250-SIZE {}\r\n", self.max_message_size));
                response.push_str("250-8BITMIME\r\n");
                response.push_str("250-PIPELINING\r\n");
                if self.tls_config.is_some() && !self.is_encrypted {
                    response.push_str("250-STARTTLS\r\n");
                }
                response.push_str("250 AUTH PLAIN LOGIN\r\n");
                Ok(response)
            }
            (SmtpState::Ready | SmtpState::Mail | SmtpState::Rcpt, SmtpCommand::MailFrom(from)) => {
                if self.authenticated_user.is_none() {
                    warn!("MAIL FROM rejected: authentication required");
                    return Ok("530 Authentication required\r\n".to_string());
                }

                // Only senders in the served domain may relay.
                let anchor = format!("@{}", self.domain.to_lowercase());
                if !from.to_lowercase().ends_with(&anchor) {
                    warn!("MAIL FROM rejected: {} outside domain {}", from, self.domain);
                    return Ok(format!(
                        "553 Sender address must end in @{}\r\n",
                        self.domain
                    ));
                }

                info!("MAIL FROM: {}", from);
                self.from = Some(from);
                self.to.clear();
                self.data.clear();
                self.state = SmtpState::Mail;
                Ok("250 OK\r\n".to_string())
            }
            (SmtpState::Mail | SmtpState::Rcpt, SmtpCommand::RcptTo(to)) => {
                if !validate_address(&to) {
                    return Ok("501 Invalid recipient address\r\n".to_string());
                }

                if self.to.len() >= MAX_RECIPIENTS {
                    warn!("Too many recipients: {}", self.to.len());
                    return Ok(format!(
                        "452 Too many recipients (max {})\r\n",
                        MAX_RECIPIENTS
                    ));
                }

                info!("RCPT TO: {}", to);
                self.to.push(to);
                self.state = SmtpState::Rcpt;
                Ok("250 OK\r\n".to_string())
            }
            (SmtpState::Rcpt, SmtpCommand::Data) => {
                info!("DATA command received");
                self.state = SmtpState::Data;
                Ok("354 Start mail input; end with <CRLF>.<CRLF>\r\n".to_string())
            }
            (_, SmtpCommand::Rset) => {
                info!("RSET command");
                self.reset_envelope();
                Ok("250 OK\r\n".to_string())
            }
            (_, SmtpCommand::Noop) => Ok("250 OK\r\n".to_string()),
            (_, SmtpCommand::Quit) => {
                info!("QUIT command");
                Ok(format!("221 {} closing connection\r\n", self.domain))
            }
            // Both are intercepted in process_commands before dispatch.
            (_, SmtpCommand::StartTls) | (_, SmtpCommand::Auth(_, _)) => {
                error!("STARTTLS/AUTH command reached handle_command");
                Ok("503 Bad sequence of commands\r\n".to_string())
            }
            (_, SmtpCommand::Unknown(cmd)) => {
                error!("Unknown command: {}", cmd);
                Ok("500 Command not recognized\r\n".to_string())
            }
            _ => {
                error!("Invalid command sequence");
                Ok("503 Bad sequence of commands\r\n".to_string())
            }
        }
    }

    /// Receive message content after DATA, ending at the lone `.` line.
    ///
    /// Writes its own reply: dot-unstuffed content goes to the relay on
    /// success, oversized or rejected messages get a 451. Either way the
    /// envelope resets so the client can try again.
    async fn receive_data<S>(&mut self, buf_reader: &mut BufReader<S>) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let mut line = String::new();
        let mut oversized = false;

        loop {
            line.clear();

            let read_result = timeout(DATA_TIMEOUT, buf_reader.read_line(&mut line)).await;
            let n = match read_result {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("IO error during DATA: {}", e);
                    return Err(e.into());
                }
                Err(_) => {
                    warn!("DATA timeout");
                    return Err(BridgeError::SmtpProtocol("Timeout during DATA".to_string()));
                }
            };

            if n == 0 {
                return Err(BridgeError::SmtpProtocol(
                    "Connection closed during DATA".to_string(),
                ));
            }

            if line.trim_end() == "." {
                break;
            }

            // Past the size cap, keep consuming to the terminator so the
            // session stays in sync with the client.
            if oversized {
                continue;
            }

            if self.data.len() + line.len() > self.max_message_size {
                warn!(
                    "Message too large: over {} bytes (max {})",
                    self.data.len(),
                    self.max_message_size
                );
                oversized = true;
                self.data.clear();
                continue;
            }

            // Dot-unstuffing (RFC 5321 section 4.5.2)
            if let Some(stripped) = line.strip_prefix('.') {
                self.data.extend_from_slice(stripped.as_bytes());
            } else {
                self.data.extend_from_slice(line.as_bytes());
            }
        }

        if oversized {
            buf_reader
                .write_all(
                    format!("451 Message too large (max {} bytes)\r\n", self.max_message_size)
                        .as_bytes(),
                )
                .await?;
            self.reset_envelope();
            return Ok(());
        }

        info!("End of DATA received, total size: {} bytes", self.data.len());
        self.submit_message(buf_reader).await
    }

    /// Hand the finished message to the relay and archive a copy.
    async fn submit_message<S>(&mut self, buf_reader: &mut BufReader<S>) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let from = self
            .from
            .clone()
            .ok_or_else(|| BridgeError::SmtpProtocol("No sender specified".to_string()))?;

        match self.relay.send_raw(&from, &self.to, &self.data).await {
            Ok(message_id) => {
                info!(
                    "Message relayed from {} to {} recipient(s): {}",
                    from,
                    self.to.len(),
                    message_id
                );

                // The message is already sent; losing the archive copy
                // must not fail the transaction.
                let key = format!("sent/{}", uuid::Uuid::new_v4());
                if let Err(e) = self.store.put(&key, self.data.clone(), "message/rfc822").await {
                    warn!("Failed to archive sent message as {}: {}", key, e);
                }

                buf_reader
                    .write_all(format!("250 OK: queued as {}\r\n", message_id).as_bytes())
                    .await?;
            }
            Err(e) => {
                warn!("Relay rejected message from {}: {}", from, e);
                buf_reader
                    .write_all(b"451 Requested action aborted: error in processing\r\n")
                    .await?;
            }
        }

        self.reset_envelope();
        Ok(())
    }

    /// Upgrade the connection to TLS in-place.
    ///
    /// Returns `Ok(true)` when the handshake ran and the stream was
    /// swapped, `Ok(false)` when STARTTLS was refused with a reply.
    async fn handle_starttls_upgrade(&mut self, stream: &mut MailStream) -> Result<bool> {
        let tls_config = match &self.tls_config {
            Some(config) => config.clone(),
            None => {
                stream.write_all(b"503 STARTTLS not available\r\n").await?;
                return Ok(false);
            }
        };

        if self.is_encrypted {
            stream.write_all(b"503 Already using TLS\r\n").await?;
            return Ok(false);
        }

        if self.state != SmtpState::Ready {
            stream.write_all(b"503 Bad sequence of commands\r\n").await?;
            return Ok(false);
        }

        info!("STARTTLS: Initiating TLS upgrade");
        stream.write_all(b"220 Ready to start TLS\r\n").await?;
        stream.flush().await?;

        stream.upgrade(&tls_config).await?;
        self.is_encrypted = true;

        // Plaintext-phase identity does not carry across the handshake.
        self.authenticated_user = None;
        self.reset_envelope();

        Ok(true)
    }

    async fn handle_auth<S>(
        &mut self,
        mechanism: &str,
        initial_response: Option<String>,
        buf_reader: &mut BufReader<S>,
    ) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        if self.authenticated_user.is_some() {
            buf_reader.write_all(b"503 Already authenticated\r\n").await?;
            return Ok(());
        }

        if self.state != SmtpState::Ready {
            buf_reader.write_all(b"503 Bad sequence of commands\r\n").await?;
            return Ok(());
        }

        let auth_mechanism = match AuthMechanism::from_str(mechanism) {
            Some(m) => m,
            None => {
                buf_reader
                    .write_all(b"504 Authentication mechanism not supported\r\n")
                    .await?;
                return Ok(());
            }
        };

        info!("AUTH {} initiated", auth_mechanism.as_str());

        match auth_mechanism {
            AuthMechanism::Plain => {
                let auth_data = match initial_response {
                    Some(data) => data,
                    None => {
                        buf_reader.write_all(b"334 \r\n").await?;

                        let mut line = String::new();
                        timeout(COMMAND_TIMEOUT, buf_reader.read_line(&mut line))
                            .await
                            .map_err(|_| {
                                BridgeError::SmtpProtocol("AUTH timeout".to_string())
                            })??;
                        line.trim().to_string()
                    }
                };

                if auth_data == "*" {
                    buf_reader.write_all(b"501 Authentication cancelled\r\n").await?;
                    return Ok(());
                }

                let (username, password) = Authenticator::decode_plain_auth(&auth_data)?;
                self.finish_auth(&username, &password, buf_reader).await
            }
            AuthMechanism::Login => {
                // Prompts are base64 for "Username:" and "Password:".
                let username_b64 = match initial_response {
                    Some(data) => data,
                    None => {
                        buf_reader.write_all(b"334 VXNlcm5hbWU6\r\n").await?;

                        let mut line = String::new();
                        timeout(COMMAND_TIMEOUT, buf_reader.read_line(&mut line))
                            .await
                            .map_err(|_| {
                                BridgeError::SmtpProtocol("AUTH timeout".to_string())
                            })??;
                        line.trim().to_string()
                    }
                };

                if username_b64 == "*" {
                    buf_reader.write_all(b"501 Authentication cancelled\r\n").await?;
                    return Ok(());
                }
                let username = Authenticator::decode_login_credential(&username_b64)?;

                buf_reader.write_all(b"334 UGFzc3dvcmQ6\r\n").await?;

                let mut line = String::new();
                timeout(COMMAND_TIMEOUT, buf_reader.read_line(&mut line))
                    .await
                    .map_err(|_| BridgeError::SmtpProtocol("AUTH timeout".to_string()))??;
                let password_b64 = line.trim();

                if password_b64 == "*" {
                    buf_reader.write_all(b"501 Authentication cancelled\r\n").await?;
                    return Ok(());
                }
                let password = Authenticator::decode_login_credential(password_b64)?;

                self.finish_auth(&username, &password, buf_reader).await
            }
        }
    }

    async fn finish_auth<S>(
        &mut self,
        username: &str,
        password: &str,
        buf_reader: &mut BufReader<S>,
    ) -> Result<()>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        if self.authenticator.verify_login(username, password) {
            let user = Authenticator::strip_domain(username).to_string();
            info!("Authentication successful for {}", user);
            self.authenticated_user = Some(user);
            buf_reader.write_all(b"235 Authentication successful\r\n").await?;
        } else {
            warn!("Authentication failed for {}", username);
            buf_reader.write_all(b"535 Authentication failed\r\n").await?;
            self.error_count += 1;
        }
        Ok(())
    }

    fn reset_envelope(&mut self) {
        self.from = None;
        self.to.clear();
        self.data.clear();
        self.state = SmtpState::Ready;
    }
}

/// Light address shape check; real validation belongs to the relay.
fn validate_address(address: &str) -> bool {
    !address.is_empty()
        && address.len() < 320
        && address.contains('@')
        && !address.chars().any(|c| c.is_whitespace() || c.is_control())
}
