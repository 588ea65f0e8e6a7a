use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

pub struct ImapTestClient {
    stream: BufReader<TcpStream>,
    tag_counter: u32,
    idle_tag: Option<String>,
    pub greeting: String,
}

impl ImapTestClient {
    /// Connect to the IMAP server and consume the greeting.
    pub async fn connect(addr: &str) -> Result<Self, String> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| format!("Failed to connect to IMAP: {}", e))?;

        let mut client = Self {
            stream: BufReader::new(stream),
            tag_counter: 0,
            idle_tag: None,
            greeting: String::new(),
        };

        let greeting = client.read_line().await?;
        if !greeting.starts_with("* OK") {
            return Err(format!("Unexpected greeting: {}", greeting));
        }
        client.greeting = greeting;

        Ok(client)
    }

    /// Send one tagged command and collect everything through its
    /// tagged completion line.
    pub async fn command(&mut self, command: &str) -> Result<String, String> {
        let tag = self.next_tag();
        self.write_line(&format!("{} {}", tag, command)).await?;
        self.read_until_tag(&tag).await
    }

    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), String> {
        let response = self
            .command(&format!("LOGIN {} {}", username, password))
            .await?;
        if !response.contains("OK LOGIN completed") {
            return Err(format!("Login failed: {}", response));
        }
        Ok(())
    }

    /// Select a mailbox and parse the EXISTS count out of the reply.
    pub async fn select(&mut self, mailbox: &str) -> Result<MailboxInfo, String> {
        let response = self.command(&format!("SELECT \"{}\"", mailbox)).await?;
        if !response.contains("SELECT completed") {
            return Err(format!("SELECT failed: {}", response));
        }

        let exists = response
            .lines()
            .find(|line| line.contains("EXISTS"))
            .and_then(|line| {
                line.split_whitespace()
                    .nth(1)
                    .and_then(|s| s.parse::<usize>().ok())
            })
            .unwrap_or(0);

        Ok(MailboxInfo { exists })
    }

    /// Fetch over a sequence set, returning the raw response.
    pub async fn fetch(&mut self, set: &str, items: &str) -> Result<String, String> {
        self.command(&format!("FETCH {} {}", set, items)).await
    }

    /// Search and parse the sequence numbers from the untagged reply.
    pub async fn search(&mut self, criteria: &str) -> Result<Vec<usize>, String> {
        let response = self.command(&format!("SEARCH {}", criteria)).await?;
        if !response.contains("OK SEARCH completed") {
            return Err(format!("SEARCH failed: {}", response));
        }

        let numbers: Vec<usize> = response
            .lines()
            .find(|line| line.starts_with("* SEARCH"))
            .map(|line| {
                line.split_whitespace()
                    .skip(2) // Skip "* SEARCH"
                    .filter_map(|s| s.parse::<usize>().ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(numbers)
    }

    /// APPEND one message through a literal.
    pub async fn append(
        &mut self,
        mailbox: &str,
        flags: &str,
        body: &[u8],
    ) -> Result<String, String> {
        let tag = self.next_tag();
        let line = if flags.is_empty() {
            format!("{} APPEND \"{}\" {{{}}}", tag, mailbox, body.len())
        } else {
            format!("{} APPEND \"{}\" ({}) {{{}}}", tag, mailbox, flags, body.len())
        };
        self.write_line(&line).await?;

        let go_ahead = self.read_line().await?;
        if !go_ahead.starts_with('+') {
            return Err(format!("APPEND not accepted: {}", go_ahead));
        }

        self.stream
            .get_mut()
            .write_all(body)
            .await
            .map_err(|e| format!("Failed to send literal: {}", e))?;
        self.write_line("").await?;
        self.read_until_tag(&tag).await
    }

    /// Enter IDLE. The server acknowledges with a continuation line.
    pub async fn idle(&mut self) -> Result<String, String> {
        let tag = self.next_tag();
        self.write_line(&format!("{} IDLE", tag)).await?;
        let line = self.read_line().await?;
        if !line.starts_with('+') {
            return Err(format!("IDLE not accepted: {}", line));
        }
        self.idle_tag = Some(tag);
        Ok(line)
    }

    /// Leave IDLE and collect the tagged completion.
    pub async fn done(&mut self) -> Result<String, String> {
        let tag = self
            .idle_tag
            .take()
            .ok_or_else(|| "DONE without a pending IDLE".to_string())?;
        self.write_line("DONE").await?;
        self.read_until_tag(&tag).await
    }

    pub async fn logout(mut self) -> Result<String, String> {
        let tag = self.next_tag();
        self.write_line(&format!("{} LOGOUT", tag)).await?;
        self.read_until_tag(&tag).await
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{:04}", self.tag_counter)
    }

    async fn write_line(&mut self, line: &str) -> Result<(), String> {
        let data = format!("{}\r\n", line);
        self.stream
            .get_mut()
            .write_all(data.as_bytes())
            .await
            .map_err(|e| format!("Failed to send command: {}", e))?;
        self.stream
            .get_mut()
            .flush()
            .await
            .map_err(|e| format!("Failed to flush: {}", e))
    }

    async fn read_line(&mut self) -> Result<String, String> {
        let mut line = String::new();
        let n = self
            .stream
            .read_line(&mut line)
            .await
            .map_err(|e| format!("Failed to read response: {}", e))?;
        if n == 0 {
            return Err("Connection closed".to_string());
        }
        Ok(line.trim_end().to_string())
    }

    async fn read_until_tag(&mut self, tag: &str) -> Result<String, String> {
        let tagged = format!("{} ", tag);
        let mut response = String::new();
        loop {
            let mut line = String::new();
            let n = self
                .stream
                .read_line(&mut line)
                .await
                .map_err(|e| format!("Failed to read response: {}", e))?;
            if n == 0 {
                return Err(format!("Connection closed while waiting for {}", tag));
            }
            response.push_str(&line);
            if line.starts_with(&tagged) {
                return Ok(response);
            }
        }
    }
}

#[derive(Debug)]
pub struct MailboxInfo {
    pub exists: usize,
}
