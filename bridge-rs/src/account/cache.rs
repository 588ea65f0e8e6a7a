//! Short-lived folder listings.
//!
//! Loading a folder costs one LIST plus one GET per message, so results
//! are kept for a few seconds to absorb the FETCH bursts clients issue
//! right after SELECT. Staleness is bounded by the TTL; commands that need
//! an exact view force a reload instead.

use crate::mail::Message;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const CACHE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct CacheEntry {
    messages: Vec<Message>,
    loaded_at: Instant,
}

/// One account's cached folder listings, keyed by folder name. Lives
/// under the per-user lock, so no interior locking here.
#[derive(Debug, Default)]
pub struct FolderCache {
    entries: HashMap<String, CacheEntry>,
}

impl FolderCache {
    /// A hit requires a fresh entry with at least one message. Empty
    /// results are never trusted: a listing hiccup that returned nothing
    /// must not blank the folder for a full TTL.
    pub fn get_fresh(&self, folder: &str) -> Option<&[Message]> {
        let entry = self.entries.get(folder)?;
        if entry.loaded_at.elapsed() < CACHE_TTL && !entry.messages.is_empty() {
            Some(&entry.messages)
        } else {
            None
        }
    }

    /// Message count of the cached entry regardless of freshness.
    /// Used to detect changes across a forced reload.
    pub fn known_count(&self, folder: &str) -> Option<usize> {
        self.entries.get(folder).map(|entry| entry.messages.len())
    }

    /// Replace the entry wholesale; readers only ever see complete lists.
    pub fn insert(&mut self, folder: &str, messages: Vec<Message>) {
        self.entries.insert(
            folder.to_string(),
            CacheEntry {
                messages,
                loaded_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&mut self, folder: &str) {
        self.entries.remove(folder);
    }

    /// Mutate a cached listing in place (flag updates, removals) without
    /// touching its load timestamp.
    pub fn update<F>(&mut self, folder: &str, mutate: F)
    where
        F: FnOnce(&mut Vec<Message>),
    {
        if let Some(entry) = self.entries.get_mut(folder) {
            mutate(&mut entry.messages);
        }
    }
}
