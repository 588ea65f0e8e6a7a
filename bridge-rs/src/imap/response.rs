//! IMAP response rendering.
//!
//! Everything here produces wire-ready fragments. FETCH responses are
//! built as raw bytes because literals carry message bodies verbatim and
//! their byte counts must match exactly.

use crate::mail::{self, Message};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Quote a string, escaping backslashes and double quotes.
pub fn imap_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn quoted_or_nil(value: &str) -> String {
    if value.is_empty() {
        "NIL".to_string()
    } else {
        imap_quote(value)
    }
}

/// `INTERNALDATE` timestamp: `10-Aug-2026 07:30:00 +0000`.
pub fn internal_date(date: &DateTime<Utc>) -> String {
    date.format("%d-%b-%Y %H:%M:%S +0000").to_string()
}

/// One-entry address list from a raw header value, or NIL.
fn address_list(value: &str) -> String {
    if value.trim().is_empty() {
        return "NIL".to_string();
    }
    let (name, mailbox, host) = mail::parse_address(value);
    format!(
        "(({} NIL {} {}))",
        name.as_deref().map(imap_quote).unwrap_or_else(|| "NIL".to_string()),
        quoted_or_nil(&mailbox),
        quoted_or_nil(&host),
    )
}

/// RFC 3501 ENVELOPE: date, subject, from, sender, reply-to, to, cc,
/// bcc, in-reply-to, message-id. Sender and reply-to mirror From; this
/// bridge never surfaces distinct values for them.
pub fn envelope(message: &Message) -> String {
    let from = address_list(&message.from);
    format!(
        "({} {} {} {} {} {} {} NIL {} {})",
        imap_quote(&message.date.to_rfc2822()),
        quoted_or_nil(&message.subject),
        from.clone(),
        from.clone(),
        from,
        address_list(&message.to),
        message
            .headers
            .get("cc")
            .map(|cc| address_list(cc))
            .unwrap_or_else(|| "NIL".to_string()),
        quoted_or_nil(message.headers.get("in-reply-to").map(String::as_str).unwrap_or("")),
        quoted_or_nil(message.headers.get("message-id").map(String::as_str).unwrap_or("")),
    )
}

/// Single-part text/plain structure stub. MIME trees are not walked;
/// clients get the whole body through BODY[] regardless.
pub fn bodystructure(text_len: usize, text_lines: usize) -> String {
    format!(
        "(\"TEXT\" \"PLAIN\" (\"CHARSET\" \"UTF-8\") NIL NIL \"7BIT\" {} {})",
        text_len, text_lines
    )
}

pub fn flag_list(flags: &BTreeSet<String>) -> String {
    let joined: Vec<&str> = flags.iter().map(String::as_str).collect();
    format!("({})", joined.join(" "))
}

/// Whether any requested item needs the message bytes fetched.
pub fn items_need_raw(items: &[String]) -> bool {
    items.iter().any(|item| {
        let upper = item.to_uppercase();
        matches!(
            upper.as_str(),
            "BODY[]"
                | "BODY.PEEK[]"
                | "RFC822"
                | "RFC822.HEADER"
                | "RFC822.TEXT"
                | "BODY[HEADER]"
                | "BODY.PEEK[HEADER]"
                | "BODY[TEXT]"
                | "BODY.PEEK[TEXT]"
                | "BODY"
                | "BODYSTRUCTURE"
        )
    })
}

fn literal(label: &str, data: &[u8]) -> Vec<u8> {
    let mut out = format!("{} {{{}}}\r\n", label, data.len()).into_bytes();
    out.extend_from_slice(data);
    out
}

/// Render one `* seq FETCH (...)` line. Unknown items are skipped rather
/// than rejected; clients probe for extensions they can live without.
pub fn fetch_line(
    seq: u32,
    message: &Message,
    items: &[String],
    include_uid: bool,
    raw: Option<&[u8]>,
) -> Vec<u8> {
    let mut parts: Vec<Vec<u8>> = Vec::new();
    if include_uid && !items.iter().any(|i| i.eq_ignore_ascii_case("UID")) {
        parts.push(format!("UID {}", message.uid).into_bytes());
    }

    for item in items {
        let upper = item.to_uppercase();
        match upper.as_str() {
            "UID" => parts.push(format!("UID {}", message.uid).into_bytes()),
            "FLAGS" => parts.push(format!("FLAGS {}", flag_list(&message.flags)).into_bytes()),
            "RFC822.SIZE" => parts.push(format!("RFC822.SIZE {}", message.size).into_bytes()),
            "INTERNALDATE" => parts.push(
                format!("INTERNALDATE \"{}\"", internal_date(&message.date)).into_bytes(),
            ),
            "ENVELOPE" => parts.push(format!("ENVELOPE {}", envelope(message)).into_bytes()),
            "BODY" | "BODYSTRUCTURE" => {
                let text = raw.map(mail::text_section).unwrap_or(b"");
                let lines = text.iter().filter(|&&b| b == b'\n').count();
                parts.push(
                    format!("{} {}", upper, bodystructure(text.len(), lines)).into_bytes(),
                );
            }
            "BODY[]" | "BODY.PEEK[]" => {
                if let Some(raw) = raw {
                    parts.push(literal("BODY[]", raw));
                }
            }
            "RFC822" => {
                if let Some(raw) = raw {
                    parts.push(literal("RFC822", raw));
                }
            }
            "BODY[HEADER]" | "BODY.PEEK[HEADER]" => {
                if let Some(raw) = raw {
                    parts.push(literal("BODY[HEADER]", mail::header_section(raw)));
                }
            }
            "RFC822.HEADER" => {
                if let Some(raw) = raw {
                    parts.push(literal("RFC822.HEADER", mail::header_section(raw)));
                }
            }
            "BODY[TEXT]" | "BODY.PEEK[TEXT]" => {
                if let Some(raw) = raw {
                    parts.push(literal("BODY[TEXT]", mail::text_section(raw)));
                }
            }
            "RFC822.TEXT" => {
                if let Some(raw) = raw {
                    parts.push(literal("RFC822.TEXT", mail::text_section(raw)));
                }
            }
            _ => {}
        }
    }

    let mut line = format!("* {} FETCH (", seq).into_bytes();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            line.push(b' ');
        }
        line.extend_from_slice(part);
    }
    line.extend_from_slice(b")\r\n");
    line
}
