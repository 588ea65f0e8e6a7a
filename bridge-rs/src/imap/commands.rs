//! IMAP command parsing.
//!
//! One line in, one `(tag, command)` out. The tokenizer understands
//! quoted strings and parenthesized lists; everything else is an atom.
//! Unknown verbs parse successfully so the session can name them in its
//! BAD reply.

use crate::account::FlagOp;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum ImapCommand {
    Capability,
    Noop,
    Logout,
    StartTls,
    Login { username: String, password: String },
    Authenticate { mechanism: String },
    Select { mailbox: String },
    Examine { mailbox: String },
    Create { mailbox: String },
    Delete { mailbox: String },
    Rename { from: String, to: String },
    Subscribe { mailbox: String },
    Unsubscribe { mailbox: String },
    List { pattern: String },
    Lsub { pattern: String },
    Xlist { pattern: String },
    Status { mailbox: String },
    Append { mailbox: String, flags: Vec<String>, size: usize },
    Check,
    Close,
    Unselect,
    /// Plain EXPUNGE carries no set; UID EXPUNGE names the UIDs.
    Expunge { uid_set: Option<String> },
    Search { by_uid: bool, criteria: String },
    Fetch { by_uid: bool, sequence: String, items: Vec<String> },
    Store { by_uid: bool, sequence: String, op: FlagOp, silent: bool, flags: Vec<String> },
    Copy { by_uid: bool, sequence: String, mailbox: String },
    Move { by_uid: bool, sequence: String, mailbox: String },
    Idle,
    Namespace,
    /// Untagged IDLE terminator.
    Done,
    Unknown { verb: String },
}

impl ImapCommand {
    /// Parse one command line into its tag and command.
    pub fn parse(line: &str) -> Result<(String, ImapCommand)> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::ImapProtocol("empty command".to_string()));
        }
        // DONE arrives without a tag while the connection is idling.
        if trimmed.eq_ignore_ascii_case("DONE") {
            return Ok((String::new(), ImapCommand::Done));
        }

        let (tag, rest) = trimmed
            .split_once(' ')
            .ok_or_else(|| BridgeError::ImapProtocol("missing command".to_string()))?;
        let mut tokens = tokenize(rest)?;
        if tokens.is_empty() {
            return Err(BridgeError::ImapProtocol("missing command".to_string()));
        }

        let mut verb = tokens.remove(0).to_uppercase();
        let mut by_uid = false;
        if verb == "UID" {
            if tokens.is_empty() {
                return Err(BridgeError::ImapProtocol("UID requires a command".to_string()));
            }
            by_uid = true;
            verb = tokens.remove(0).to_uppercase();
        }

        let command = Self::from_tokens(&verb, by_uid, tokens)?;
        Ok((tag.to_string(), command))
    }

    fn from_tokens(verb: &str, by_uid: bool, tokens: Vec<String>) -> Result<ImapCommand> {
        let command = match verb {
            "CAPABILITY" => ImapCommand::Capability,
            "NOOP" => ImapCommand::Noop,
            "LOGOUT" => ImapCommand::Logout,
            "STARTTLS" => ImapCommand::StartTls,
            "CHECK" => ImapCommand::Check,
            "CLOSE" => ImapCommand::Close,
            "UNSELECT" => ImapCommand::Unselect,
            "IDLE" => ImapCommand::Idle,
            "NAMESPACE" => ImapCommand::Namespace,
            "LOGIN" => {
                let [username, password] = two_args(tokens, "LOGIN")?;
                ImapCommand::Login { username, password }
            }
            "AUTHENTICATE" => ImapCommand::Authenticate {
                mechanism: one_arg(tokens, "AUTHENTICATE")?,
            },
            "SELECT" => ImapCommand::Select { mailbox: one_arg(tokens, "SELECT")? },
            "EXAMINE" => ImapCommand::Examine { mailbox: one_arg(tokens, "EXAMINE")? },
            "CREATE" => ImapCommand::Create { mailbox: one_arg(tokens, "CREATE")? },
            "DELETE" => ImapCommand::Delete { mailbox: one_arg(tokens, "DELETE")? },
            "SUBSCRIBE" => ImapCommand::Subscribe { mailbox: one_arg(tokens, "SUBSCRIBE")? },
            "UNSUBSCRIBE" => ImapCommand::Unsubscribe { mailbox: one_arg(tokens, "UNSUBSCRIBE")? },
            "RENAME" => {
                let [from, to] = two_args(tokens, "RENAME")?;
                ImapCommand::Rename { from, to }
            }
            // The reference argument is accepted and ignored; the folder
            // set is flat.
            "LIST" => ImapCommand::List { pattern: list_pattern(tokens) },
            "LSUB" => ImapCommand::Lsub { pattern: list_pattern(tokens) },
            "XLIST" => ImapCommand::Xlist { pattern: list_pattern(tokens) },
            "STATUS" => {
                if tokens.is_empty() {
                    return Err(BridgeError::ImapProtocol("STATUS requires a mailbox".to_string()));
                }
                ImapCommand::Status { mailbox: tokens[0].clone() }
            }
            "APPEND" => {
                if tokens.len() < 2 {
                    return Err(BridgeError::ImapProtocol(
                        "APPEND requires a mailbox and a literal".to_string(),
                    ));
                }
                let size = tokens
                    .last()
                    .and_then(|token| parse_literal(token))
                    .ok_or_else(|| {
                        BridgeError::ImapProtocol("APPEND requires a literal size".to_string())
                    })?;
                let flags = tokens[1..tokens.len() - 1]
                    .iter()
                    .find_map(|token| paren_items(token))
                    .unwrap_or_default();
                ImapCommand::Append { mailbox: tokens[0].clone(), flags, size }
            }
            "EXPUNGE" => {
                if by_uid {
                    let uid_set = one_arg(tokens, "UID EXPUNGE")?;
                    return Ok(ImapCommand::Expunge { uid_set: Some(uid_set) });
                }
                ImapCommand::Expunge { uid_set: None }
            }
            "SEARCH" => ImapCommand::Search { by_uid, criteria: tokens.join(" ") },
            "FETCH" => {
                if tokens.len() < 2 {
                    return Err(BridgeError::ImapProtocol(
                        "FETCH requires a sequence set and items".to_string(),
                    ));
                }
                let sequence = tokens[0].clone();
                let mut items = Vec::new();
                for token in &tokens[1..] {
                    match paren_items(token) {
                        Some(list) => items.extend(list),
                        None => items.push(token.clone()),
                    }
                }
                ImapCommand::Fetch { by_uid, sequence, items }
            }
            "STORE" => {
                if tokens.len() < 3 {
                    return Err(BridgeError::ImapProtocol(
                        "STORE requires a sequence set, an operation and flags".to_string(),
                    ));
                }
                let sequence = tokens[0].clone();
                let op_token = tokens[1].to_uppercase();
                let silent = op_token.ends_with(".SILENT");
                let op = match op_token.trim_end_matches(".SILENT") {
                    "+FLAGS" => FlagOp::Add,
                    "-FLAGS" => FlagOp::Remove,
                    "FLAGS" => FlagOp::Replace,
                    other => {
                        return Err(BridgeError::ImapProtocol(format!(
                            "invalid STORE operation: {}",
                            other
                        )))
                    }
                };
                let mut flags = Vec::new();
                for token in &tokens[2..] {
                    match paren_items(token) {
                        Some(list) => flags.extend(list),
                        None => flags.push(token.clone()),
                    }
                }
                ImapCommand::Store { by_uid, sequence, op, silent, flags }
            }
            "COPY" => {
                let [sequence, mailbox] = two_args(tokens, "COPY")?;
                ImapCommand::Copy { by_uid, sequence, mailbox }
            }
            "MOVE" => {
                let [sequence, mailbox] = two_args(tokens, "MOVE")?;
                ImapCommand::Move { by_uid, sequence, mailbox }
            }
            _ => ImapCommand::Unknown { verb: verb.to_string() },
        };
        Ok(command)
    }
}

/// Expand a sequence set against the current maximum (message count for
/// sequence numbers, highest UID for UID sets). `*` stands for the
/// maximum, reversed range bounds are swapped, duplicates collapse, and
/// the result comes back sorted ascending. Numbers above the maximum
/// cannot match anything and are dropped.
pub fn parse_sequence_set(raw: &str, max: u32) -> Result<Vec<u32>> {
    let mut selected = std::collections::BTreeSet::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(BridgeError::ImapProtocol("empty sequence set element".to_string()));
        }
        let (lo, hi) = match part.split_once(':') {
            Some((a, b)) => (parse_seq_number(a, max)?, parse_seq_number(b, max)?),
            None => {
                let n = parse_seq_number(part, max)?;
                (n, n)
            }
        };
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        for n in lo..=hi.min(max) {
            if n >= 1 {
                selected.insert(n);
            }
        }
    }
    Ok(selected.into_iter().collect())
}

fn parse_seq_number(token: &str, max: u32) -> Result<u32> {
    let token = token.trim();
    if token == "*" {
        return Ok(max);
    }
    token
        .parse()
        .map_err(|_| BridgeError::ImapProtocol(format!("invalid sequence number: {}", token)))
}

/// Split an argument string into atoms, quoted strings (quotes removed)
/// and parenthesized lists (parens kept).
fn tokenize(input: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '"' => {
                chars.next();
                let mut token = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(c) => token.push(c),
                        None => {
                            return Err(BridgeError::ImapProtocol(
                                "unterminated quoted string".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(token);
            }
            '(' => {
                let mut depth = 0usize;
                let mut token = String::new();
                loop {
                    match chars.next() {
                        Some('(') => {
                            depth += 1;
                            token.push('(');
                        }
                        Some(')') => {
                            depth -= 1;
                            token.push(')');
                            if depth == 0 {
                                break;
                            }
                        }
                        Some(c) => token.push(c),
                        None => {
                            return Err(BridgeError::ImapProtocol(
                                "unterminated parenthesized list".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(token);
            }
            _ => {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ' ' || c == '\t' {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                tokens.push(token);
            }
        }
    }
    Ok(tokens)
}

fn paren_items(token: &str) -> Option<Vec<String>> {
    let inner = token.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.split_whitespace().map(str::to_string).collect())
}

/// `{310}` or `{310+}` at the end of an APPEND line.
fn parse_literal(token: &str) -> Option<usize> {
    let inner = token.strip_prefix('{')?.strip_suffix('}')?;
    let inner = inner.strip_suffix('+').unwrap_or(inner);
    inner.parse().ok()
}

fn one_arg(mut tokens: Vec<String>, verb: &str) -> Result<String> {
    if tokens.len() != 1 {
        return Err(BridgeError::ImapProtocol(format!(
            "{} requires exactly one argument",
            verb
        )));
    }
    Ok(tokens.remove(0))
}

fn two_args(mut tokens: Vec<String>, verb: &str) -> Result<[String; 2]> {
    if tokens.len() != 2 {
        return Err(BridgeError::ImapProtocol(format!(
            "{} requires exactly two arguments",
            verb
        )));
    }
    let second = tokens.remove(1);
    let first = tokens.remove(0);
    Ok([first, second])
}

fn list_pattern(tokens: Vec<String>) -> String {
    // LIST "" "*" -- the second argument is the pattern.
    tokens.into_iter().nth(1).unwrap_or_else(|| "*".to_string())
}
