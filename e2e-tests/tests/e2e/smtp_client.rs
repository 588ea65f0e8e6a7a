use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub struct SmtpTestClient {
    stream: BufReader<TcpStream>,
    pub greeting: String,
}

impl SmtpTestClient {
    /// Connect to the SMTP server and consume the 220 greeting.
    pub async fn connect(addr: &str) -> Result<Self, String> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("Failed to connect to SMTP: {}", e))?;

        let mut client = Self {
            stream: BufReader::new(stream),
            greeting: String::new(),
        };

        let greeting = client.read_response().await?;
        if !greeting.starts_with("220") {
            return Err(format!("Unexpected greeting: {}", greeting));
        }
        client.greeting = greeting;

        Ok(client)
    }

    /// Send EHLO and return the full multi-line reply.
    pub async fn ehlo(&mut self, hostname: &str) -> Result<String, String> {
        self.command(&format!("EHLO {}", hostname)).await
    }

    /// One-shot AUTH PLAIN with the NUL-joined blob.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<String, String> {
        let blob = BASE64.encode(format!("\0{}\0{}", username, password));
        self.command(&format!("AUTH PLAIN {}", blob)).await
    }

    /// Two-step AUTH LOGIN against the base64 prompts.
    pub async fn auth_login(&mut self, username: &str, password: &str) -> Result<String, String> {
        let prompt = self.command("AUTH LOGIN").await?;
        if !prompt.starts_with("334") {
            return Err(format!("Expected username prompt: {}", prompt));
        }
        let prompt = self.command(&BASE64.encode(username)).await?;
        if !prompt.starts_with("334") {
            return Err(format!("Expected password prompt: {}", prompt));
        }
        self.command(&BASE64.encode(password)).await
    }

    /// EHLO then AUTH PLAIN; the session can submit afterwards.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), String> {
        let reply = self.ehlo("test-client").await?;
        if !reply.contains("250") {
            return Err(format!("EHLO failed: {}", reply));
        }
        let reply = self.auth_plain(username, password).await?;
        if !reply.starts_with("235") {
            return Err(format!("AUTH failed: {}", reply));
        }
        Ok(())
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<String, String> {
        self.command(&format!("MAIL FROM:<{}>", from)).await
    }

    pub async fn rcpt_to(&mut self, to: &str) -> Result<String, String> {
        self.command(&format!("RCPT TO:<{}>", to)).await
    }

    /// Send DATA and the message content, terminated by the lone dot.
    pub async fn data(&mut self, content: &str) -> Result<String, String> {
        let response = self.command("DATA").await?;
        if !response.starts_with("354") {
            return Err(format!("DATA command failed: {}", response));
        }

        self.send_command(content).await?;
        self.send_command(".").await?;
        self.read_response().await
    }

    /// Submit one message on an authenticated session.
    pub async fn send_email(
        &mut self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, String> {
        let reply = self.mail_from(from).await?;
        if !reply.starts_with("250") {
            return Err(format!("MAIL FROM rejected: {}", reply));
        }
        let reply = self.rcpt_to(to).await?;
        if !reply.starts_with("250") {
            return Err(format!("RCPT TO rejected: {}", reply));
        }

        let content = format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\n\r\n{}",
            from, to, subject, body
        );
        let reply = self.data(&content).await?;
        if !reply.starts_with("250") {
            return Err(format!("Message rejected: {}", reply));
        }
        Ok(reply)
    }

    /// Send QUIT and return the closing reply.
    pub async fn quit(mut self) -> Result<String, String> {
        self.command("QUIT").await
    }

    /// Send one command line and read its reply.
    pub async fn command(&mut self, command: &str) -> Result<String, String> {
        self.send_command(command).await?;
        self.read_response().await
    }

    async fn send_command(&mut self, command: &str) -> Result<(), String> {
        let line = format!("{}\r\n", command);
        self.stream
            .get_mut()
            .write_all(line.as_bytes())
            .await
            .map_err(|e| format!("Failed to send command: {}", e))?;
        self.stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| format!("Failed to flush: {}", e))?;
        Ok(())
    }

    /// Read one reply, including continuation lines like the EHLO block.
    async fn read_response(&mut self) -> Result<String, String> {
        let mut full_response = String::new();
        loop {
            let mut line = String::new();
            let n = self
                .stream
                .read_line(&mut line)
                .await
                .map_err(|e| format!("Failed to read response: {}", e))?;
            if n == 0 {
                return Err("Connection closed".to_string());
            }
            full_response.push_str(&line);

            // A dash after the code marks a continuation line.
            if line.len() < 4 || line.as_bytes()[3] != b'-' {
                return Ok(full_response);
            }
        }
    }
}
