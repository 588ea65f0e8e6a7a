//! Header-subset extraction from raw RFC 2822 bytes
//!
//! Full MIME parsing is out of scope; the bridge only needs the top-level
//! header map, the raw header/text sections for FETCH, and enough address
//! parsing to build an envelope.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Offset of the first byte after the blank line separating headers from
/// the body, or the message length when no blank line exists.
fn body_offset(raw: &[u8]) -> usize {
    if let Some(pos) = find(raw, b"\r\n\r\n") {
        pos + 4
    } else if let Some(pos) = find(raw, b"\n\n") {
        pos + 2
    } else {
        raw.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Raw header section including the delimiting blank line
pub fn header_section(raw: &[u8]) -> &[u8] {
    &raw[..body_offset(raw)]
}

/// Raw body text after the header section
pub fn text_section(raw: &[u8]) -> &[u8] {
    &raw[body_offset(raw)..]
}

/// Parse headers into a map keyed by lowercased header name.
///
/// Folded continuation lines (leading space or tab) are joined with a
/// single space. Later occurrences of a repeated header win; the bridge
/// only consults singleton headers.
pub fn parse_headers(raw: &[u8]) -> HashMap<String, String> {
    let text = String::from_utf8_lossy(header_section(raw));
    let mut headers = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, ref mut value)) = current {
                value.push(' ');
                value.push_str(line.trim());
            }
        } else if let Some(colon) = line.find(':') {
            if let Some((name, value)) = current.take() {
                headers.insert(name, value);
            }
            let name = line[..colon].trim().to_lowercase();
            let value = line[colon + 1..].trim().to_string();
            current = Some((name, value));
        }
    }

    if let Some((name, value)) = current {
        headers.insert(name, value);
    }

    headers
}

/// Split an address header value into (display name, mailbox, host).
///
/// Handles both `Name <user@host>` and bare `user@host`; the host is
/// everything after the last `@`. Anything unparsable degrades to a
/// mailbox with an empty host rather than an error.
pub fn parse_address(value: &str) -> (Option<String>, String, String) {
    let value = value.trim();

    let (name, addr) = match (value.find('<'), value.rfind('>')) {
        (Some(open), Some(close)) if close > open => {
            let name = value[..open].trim().trim_matches('"');
            let name = if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            };
            (name, value[open + 1..close].trim())
        }
        _ => (None, value),
    };

    match addr.rsplit_once('@') {
        Some((mailbox, host)) => (name, mailbox.to_string(), host.to_string()),
        None => (name, addr.to_string(), String::new()),
    }
}

/// Parse an RFC 2822 Date header; `None` when malformed or absent
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
