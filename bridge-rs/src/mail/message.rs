use super::headers;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};

/// A message as seen through a folder listing.
///
/// Not persisted as an entity: rebuilt on every cache-miss load from the
/// object bytes plus the UID and flag stores. The body itself is not kept
/// here; FETCH re-reads it from the store on demand.
#[derive(Debug, Clone)]
pub struct Message {
    pub uid: u32,
    pub storage_key: String,
    pub size: usize,
    pub date: DateTime<Utc>,
    pub flags: BTreeSet<String>,
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Full header map (lowercased names), kept for categorization
    pub headers: HashMap<String, String>,
}

impl Message {
    /// Build a message from a stored object's bytes and listing metadata.
    ///
    /// The Date header wins when parsable; otherwise the object's
    /// last-modified timestamp stands in.
    pub fn from_object(
        uid: u32,
        storage_key: String,
        size: usize,
        last_modified: DateTime<Utc>,
        raw: &[u8],
        flags: BTreeSet<String>,
    ) -> Self {
        let headers = headers::parse_headers(raw);
        let date = headers
            .get("date")
            .and_then(|value| headers::parse_date(value))
            .unwrap_or(last_modified);

        Self {
            uid,
            storage_key,
            size,
            date,
            flags,
            from: headers.get("from").cloned().unwrap_or_default(),
            to: headers.get("to").cloned().unwrap_or_default(),
            subject: headers.get("subject").cloned().unwrap_or_default(),
            headers,
        }
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}
