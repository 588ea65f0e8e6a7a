//! Stable UID assignment.
//!
//! Object keys have no inherent order a mail client can use, so every key
//! gets a small integer UID on first sight. Assignments never change and
//! UIDs are never reused; the document only grows.

use crate::error::Result;
use crate::store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-user key-to-UID assignments, persisted as `uids/<user>.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UidMap {
    uids: HashMap<String, u32>,
    next_uid: u32,
    #[serde(skip)]
    dirty: bool,
}

impl UidMap {
    pub fn new() -> Self {
        Self {
            uids: HashMap::new(),
            next_uid: 1,
            dirty: false,
        }
    }

    fn storage_key(user: &str) -> String {
        format!("uids/{}.json", user)
    }

    /// A missing document means a mailbox we have never seen; start at 1.
    pub async fn load(store: &dyn ObjectStore, user: &str) -> Self {
        match store.get(&Self::storage_key(user)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|_| Self::new()),
            Err(_) => Self::new(),
        }
    }

    /// The UID for a key, allocating the next one on first sight.
    pub fn uid_for_key(&mut self, key: &str) -> u32 {
        if let Some(&uid) = self.uids.get(key) {
            return uid;
        }
        let uid = self.next_uid;
        self.next_uid += 1;
        self.uids.insert(key.to_string(), uid);
        self.dirty = true;
        uid
    }

    pub fn next_uid(&self) -> u32 {
        self.next_uid
    }

    /// One write per folder load, and only when something was assigned.
    pub async fn persist_if_dirty(&mut self, store: &dyn ObjectStore, user: &str) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let body = serde_json::to_vec(&self)?;
        store.put(&Self::storage_key(user), body, "application/json").await?;
        self.dirty = false;
        Ok(())
    }
}

impl Default for UidMap {
    fn default() -> Self {
        Self::new()
    }
}
