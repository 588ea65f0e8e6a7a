//! Flag persistence.
//!
//! IMAP flags live outside the immutable message objects, in one JSON
//! document per user keyed by storage key. The whole document is rewritten
//! on change; flag volume is small enough that diffing would buy nothing.

use crate::error::Result;
use crate::store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How a STORE command combines new flags with existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOp {
    Add,
    Remove,
    Replace,
}

/// Per-user flag sets, persisted as `flags/<user>.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FlagMap {
    flags: HashMap<String, BTreeSet<String>>,
    #[serde(skip)]
    dirty: bool,
}

impl FlagMap {
    fn storage_key(user: &str) -> String {
        format!("flags/{}.json", user)
    }

    pub async fn load(store: &dyn ObjectStore, user: &str) -> Self {
        match store.get(&Self::storage_key(user)).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Current flags for a key; keys never stored report an empty set.
    pub fn flags_for(&self, key: &str) -> BTreeSet<String> {
        self.flags.get(key).cloned().unwrap_or_default()
    }

    /// Apply one STORE operation and return the resulting set.
    pub fn apply(&mut self, key: &str, op: FlagOp, flags: &[String]) -> BTreeSet<String> {
        let entry = self.flags.entry(key.to_string()).or_default();
        match op {
            FlagOp::Add => {
                for flag in flags {
                    entry.insert(flag.clone());
                }
            }
            FlagOp::Remove => {
                for flag in flags {
                    entry.remove(flag);
                }
            }
            FlagOp::Replace => {
                *entry = flags.iter().cloned().collect();
            }
        }
        self.dirty = true;
        entry.clone()
    }

    /// Drop state for keys that no longer exist (expunged or moved away).
    pub fn forget(&mut self, key: &str) {
        if self.flags.remove(key).is_some() {
            self.dirty = true;
        }
    }

    /// One write per mutating command, not per message.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn flag(name: &str) -> Vec<String> {
        vec![name.to_string()]
    }

    #[test]
    fn test_add_remove_replace() {
        let mut map = FlagMap::default();
        let result = map.apply("incoming/a", FlagOp::Add, &flag("\\Seen"));
        assert!(result.contains("\\Seen"));

        let result = map.apply("incoming/a", FlagOp::Add, &flag("\\Flagged"));
        assert_eq!(result.len(), 2);

        let result = map.apply("incoming/a", FlagOp::Remove, &flag("\\Seen"));
        assert_eq!(result.len(), 1);
        assert!(result.contains("\\Flagged"));

        let result = map.apply("incoming/a", FlagOp::Replace, &flag("\\Deleted"));
        assert_eq!(result.len(), 1);
        assert!(result.contains("\\Deleted"));
    }

    #[test]
    fn test_unknown_key_has_no_flags() {
        let map = FlagMap::default();
        assert!(map.flags_for("incoming/nope").is_empty());
    }

    #[tokio::test]
    async fn test_survives_reload() {
        let store = InMemoryStore::new();
        let mut map = FlagMap::load(&store, "chris").await;
        map.apply("incoming/a", FlagOp::Add, &flag("\\Seen"));
        map.persist_if_dirty(&store, "chris").await.unwrap();

        let reloaded = FlagMap::load(&store, "chris").await;
        assert!(reloaded.flags_for("incoming/a").contains("\\Seen"));
    }

    #[tokio::test]
    async fn test_forget_drops_key() {
        let store = InMemoryStore::new();
        let mut map = FlagMap::default();
        map.apply("incoming/a", FlagOp::Add, &flag("\\Deleted"));
        map.forget("incoming/a");
        map.persist_if_dirty(&store, "chris").await.unwrap();

        let reloaded = FlagMap::load(&store, "chris").await;
        assert!(reloaded.flags_for("incoming/a").is_empty());
    }
}
