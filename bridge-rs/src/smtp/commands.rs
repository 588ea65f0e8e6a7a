use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    Helo(String),
    Ehlo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Quit,
    Noop,
    StartTls,
    /// AUTH mechanism with the optional initial response
    Auth(String, Option<String>),
    Unknown(String),
}

impl SmtpCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.is_empty() {
            return Err(BridgeError::SmtpProtocol("Empty command".to_string()));
        }

        let parts: Vec<&str> = line.splitn(2, ' ').collect();
        let command = parts[0].to_uppercase();
        let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

        match command.as_str() {
            "HELO" => {
                if args.is_empty() {
                    return Err(BridgeError::SmtpProtocol("HELO requires domain".to_string()));
                }
                Ok(SmtpCommand::Helo(args.to_string()))
            }
            "EHLO" => {
                if args.is_empty() {
                    return Err(BridgeError::SmtpProtocol("EHLO requires domain".to_string()));
                }
                Ok(SmtpCommand::Ehlo(args.to_string()))
            }
            "MAIL" => {
                let from = Self::parse_path(args, "FROM:")?;
                Ok(SmtpCommand::MailFrom(from))
            }
            "RCPT" => {
                let to = Self::parse_path(args, "TO:")?;
                Ok(SmtpCommand::RcptTo(to))
            }
            "DATA" => Ok(SmtpCommand::Data),
            "RSET" => Ok(SmtpCommand::Rset),
            "QUIT" => Ok(SmtpCommand::Quit),
            "NOOP" => Ok(SmtpCommand::Noop),
            "STARTTLS" => Ok(SmtpCommand::StartTls),
            "AUTH" => {
                let mut fields = args.split_whitespace();
                let mechanism = fields
                    .next()
                    .ok_or_else(|| {
                        BridgeError::SmtpProtocol("AUTH requires a mechanism".to_string())
                    })?
                    .to_uppercase();
                let initial = fields.next().map(|s| s.to_string());
                Ok(SmtpCommand::Auth(mechanism, initial))
            }
            _ => Ok(SmtpCommand::Unknown(command)),
        }
    }

    /// Extract the address from `FROM:<a@b>` / `TO:<a@b>`, tolerating
    /// whitespace after the colon and trailing ESMTP parameters such as
    /// `SIZE=` and `BODY=`.
    fn parse_path(args: &str, keyword: &str) -> Result<String> {
        if !args.to_uppercase().starts_with(keyword) {
            return Err(BridgeError::SmtpProtocol(format!(
                "Invalid syntax, expected {}<address>",
                keyword
            )));
        }

        let rest = args[keyword.len()..].trim_start();
        let email = if let Some(stripped) = rest.strip_prefix('<') {
            match stripped.find('>') {
                Some(end) => &stripped[..end],
                None => {
                    return Err(BridgeError::SmtpProtocol(
                        "Unterminated address bracket".to_string(),
                    ))
                }
            }
        } else {
            // Bare address; cut before any ESMTP parameters.
            rest.split_whitespace().next().unwrap_or("")
        };

        Ok(email.trim().to_string())
    }
}
