//! Per-user mailbox state.
//!
//! Each user owns a UID map, a flag map, a categorized-keys set and a
//! folder cache, all behind one async mutex. Every read-modify-write on
//! that state happens with the lock held, so two connections of the same
//! user can never interleave a lost update. Connections of different
//! users share nothing mutable and never contend.

mod cache;
mod flags;
mod uids;

pub use flags::FlagOp;

use crate::categorize::{CategorizedSet, Categorizer};
use crate::error::{BridgeError, Result};
use crate::folder::{self, Folder, FolderSource};
use crate::mail::Message;
use crate::store::{ObjectInfo, ObjectStore};
use cache::FolderCache;
use flags::FlagMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uids::UidMap;

/// Handles to every account seen so far. Accounts are created lazily on
/// first touch and live for the process lifetime.
pub struct AccountRegistry {
    store: Arc<dyn ObjectStore>,
    categorizer: Arc<Categorizer>,
    accounts: RwLock<HashMap<String, Arc<AccountState>>>,
}

impl AccountRegistry {
    pub fn new(store: Arc<dyn ObjectStore>, categorizer: Categorizer) -> Self {
        Self {
            store,
            categorizer: Arc::new(categorizer),
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn account(&self, user: &str) -> Arc<AccountState> {
        {
            let accounts = self.accounts.read().await;
            if let Some(account) = accounts.get(user) {
                return account.clone();
            }
        }
        let mut accounts = self.accounts.write().await;
        accounts
            .entry(user.to_string())
            .or_insert_with(|| {
                Arc::new(AccountState::new(
                    user,
                    self.store.clone(),
                    self.categorizer.clone(),
                ))
            })
            .clone()
    }
}

/// Outcome of an expunge-style removal, for response synthesis.
#[derive(Debug)]
pub struct RemovedMessages {
    /// Sequence numbers at removal time, descending. Each reported number
    /// is unaffected by the removals reported before it.
    pub expunged_seqs: Vec<u32>,
    pub remaining: usize,
}

#[derive(Debug)]
pub struct FolderStatus {
    pub messages: usize,
    pub next_uid: u32,
    pub unseen: usize,
}

#[derive(Default)]
struct AccountData {
    uids: Option<UidMap>,
    flags: Option<FlagMap>,
    categorized: Option<CategorizedSet>,
    cache: FolderCache,
}

/// One user's mailbox state. All mutation goes through `inner`.
pub struct AccountState {
    user: String,
    store: Arc<dyn ObjectStore>,
    categorizer: Arc<Categorizer>,
    inner: Mutex<AccountData>,
}

impl AccountState {
    fn new(user: &str, store: Arc<dyn ObjectStore>, categorizer: Arc<Categorizer>) -> Self {
        Self {
            user: user.to_string(),
            store,
            categorizer,
            inner: Mutex::new(AccountData::default()),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    /// The folder's current messages, sorted ascending by UID. Serves the
    /// cache when it is fresh unless `force` demands a reload.
    pub async fn load_folder(&self, folder: &'static Folder, force: bool) -> Result<Vec<Message>> {
        let mut data = self.inner.lock().await;
        if !force {
            if let Some(messages) = data.cache.get_fresh(folder.name) {
                return Ok(messages.to_vec());
            }
        }
        self.reload_locked(&mut data, folder).await
    }

    /// Force a reload and report whether the message count changed since
    /// the last known view. Backs change-detecting NOOP and CHECK.
    pub async fn refresh(&self, folder: &'static Folder) -> Result<(usize, bool)> {
        let mut data = self.inner.lock().await;
        let before = data.cache.known_count(folder.name);
        let messages = self.reload_locked(&mut data, folder).await?;
        let changed = before.map(|count| count != messages.len()).unwrap_or(false);
        Ok((messages.len(), changed))
    }

    pub async fn status(&self, folder: &'static Folder) -> Result<FolderStatus> {
        let mut data = self.inner.lock().await;
        let messages = match data.cache.get_fresh(folder.name) {
            Some(messages) => messages.to_vec(),
            None => self.reload_locked(&mut data, folder).await?,
        };
        let next_uid = data.uids.get_or_insert_with(UidMap::new).next_uid();
        Ok(FolderStatus {
            messages: messages.len(),
            next_uid,
            unseen: messages.iter().filter(|m| !m.has_flag("\\Seen")).count(),
        })
    }

    /// Raw bytes of one message. Objects are immutable, so this needs no
    /// coordination with the account lock.
    pub async fn raw_message(&self, key: &str) -> Result<Vec<u8>> {
        self.store.get(key).await
    }

    /// Apply one STORE operation to the given keys, persist the flag
    /// document once, and return the resulting set per key.
    pub async fn apply_flags(
        &self,
        folder: &'static Folder,
        keys: &[String],
        op: FlagOp,
        flags: &[String],
    ) -> Result<HashMap<String, BTreeSet<String>>> {
        let mut data = self.inner.lock().await;
        self.hydrate(&mut data).await;

        let flag_map = data.flags.get_or_insert_with(FlagMap::default);
        let mut results = HashMap::new();
        for key in keys {
            results.insert(key.clone(), flag_map.apply(key, op, flags));
        }
        flag_map.persist_if_dirty(self.store.as_ref(), &self.user).await?;

        data.cache.update(folder.name, |messages| {
            for message in messages.iter_mut() {
                if let Some(new_flags) = results.get(&message.storage_key) {
                    message.flags = new_flags.clone();
                }
            }
        });
        Ok(results)
    }

    /// Remove the given keys from a folder: delete the objects, drop their
    /// flags, and report the freed sequence numbers in descending order.
    ///
    /// Object deletion is best effort; a failed delete is logged and the
    /// message still leaves the current view.
    pub async fn remove_messages(
        &self,
        folder: &'static Folder,
        keys: &[String],
    ) -> Result<RemovedMessages> {
        let mut data = self.inner.lock().await;
        self.hydrate(&mut data).await;

        let current = match data.cache.get_fresh(folder.name) {
            Some(messages) => messages.to_vec(),
            None => self.reload_locked(&mut data, folder).await?,
        };

        let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut expunged_seqs = Vec::new();
        let mut removed_keys = Vec::new();
        for (index, message) in current.iter().enumerate().rev() {
            if key_set.contains(message.storage_key.as_str()) {
                expunged_seqs.push((index + 1) as u32);
                removed_keys.push(message.storage_key.clone());
            }
        }

        let flag_map = data.flags.get_or_insert_with(FlagMap::default);
        for key in &removed_keys {
            flag_map.forget(key);
            if let Err(e) = self.store.delete(key).await {
                warn!(key = %key, error = %e, "delete of expunged object failed");
            }
        }
        flag_map.persist_if_dirty(self.store.as_ref(), &self.user).await?;

        data.cache.update(folder.name, |messages| {
            messages.retain(|m| !key_set.contains(m.storage_key.as_str()));
        });
        let remaining = data
            .cache
            .known_count(folder.name)
            .unwrap_or(current.len() - removed_keys.len());

        Ok(RemovedMessages {
            expunged_seqs,
            remaining,
        })
    }

    /// Copy messages into a real folder. The destination listing is
    /// invalidated so the copies show up on its next load.
    pub async fn copy_messages(&self, keys: &[String], dest: &'static Folder) -> Result<usize> {
        let prefix = dest.prefix().ok_or_else(|| {
            BridgeError::ImapProtocol(format!("cannot copy into virtual folder {}", dest.name))
        })?;
        let mut data = self.inner.lock().await;
        for key in keys {
            let raw = self.store.get(key).await?;
            let dest_key = format!("{}{}", prefix, basename(key));
            self.store.put(&dest_key, raw, "message/rfc822").await?;
        }
        data.cache.invalidate(dest.name);
        Ok(keys.len())
    }

    /// Store a new message in a real folder and hand back its UID.
    pub async fn append(
        &self,
        folder: &'static Folder,
        flags: &[String],
        raw: Vec<u8>,
    ) -> Result<u32> {
        let prefix = folder.prefix().ok_or_else(|| {
            BridgeError::ImapProtocol(format!("cannot append into virtual folder {}", folder.name))
        })?;
        let mut data = self.inner.lock().await;
        self.hydrate(&mut data).await;

        let key = format!("{}{}", prefix, uuid::Uuid::new_v4());
        self.store.put(&key, raw, "message/rfc822").await?;

        let uids = data.uids.get_or_insert_with(UidMap::new);
        let uid = uids.uid_for_key(&key);
        uids.persist_if_dirty(self.store.as_ref(), &self.user).await?;

        if !flags.is_empty() {
            let flag_map = data.flags.get_or_insert_with(FlagMap::default);
            flag_map.apply(&key, FlagOp::Replace, flags);
            flag_map.persist_if_dirty(self.store.as_ref(), &self.user).await?;
        }

        data.cache.invalidate(folder.name);
        debug!(user = %self.user, key = %key, uid, "appended message");
        Ok(uid)
    }

    async fn hydrate(&self, data: &mut AccountData) {
        if data.uids.is_none() {
            data.uids = Some(UidMap::load(self.store.as_ref(), &self.user).await);
        }
        if data.flags.is_none() {
            data.flags = Some(FlagMap::load(self.store.as_ref(), &self.user).await);
        }
        if data.categorized.is_none() {
            data.categorized = Some(CategorizedSet::load(self.store.as_ref(), &self.user).await);
        }
    }

    /// Rebuild one folder's view from the store and swap it into the
    /// cache. Runs the categorization sweep when the inbox is rebuilt.
    async fn reload_locked(
        &self,
        data: &mut AccountData,
        folder: &'static Folder,
    ) -> Result<Vec<Message>> {
        self.hydrate(data).await;

        let listing = self.list_source(folder).await?;

        if folder.name == "INBOX" {
            let categorized = data.categorized.get_or_insert_with(CategorizedSet::default);
            let copied = self
                .categorizer
                .sweep(self.store.as_ref(), categorized, &listing)
                .await;
            if copied > 0 {
                debug!(user = %self.user, copied, "categorization sweep copied messages");
            }
            if let Err(e) = categorized.persist_if_dirty(self.store.as_ref(), &self.user).await {
                warn!(user = %self.user, error = %e, "categorized set persist failed");
            }
        }

        let AccountData {
            uids, flags, cache, ..
        } = data;
        let uids = uids.get_or_insert_with(UidMap::new);
        let flags = flags.get_or_insert_with(FlagMap::default);

        // Flag-based virtual views filter before the per-message fetches.
        let listing: Vec<ObjectInfo> = match folder.source {
            FolderSource::Starred => listing
                .into_iter()
                .filter(|o| flags.flags_for(&o.key).contains("\\Flagged"))
                .collect(),
            FolderSource::Important => listing
                .into_iter()
                .filter(|o| {
                    let f = flags.flags_for(&o.key);
                    f.contains("\\Important") || f.contains("$Important")
                })
                .collect(),
            _ => listing,
        };

        let mut messages = Vec::with_capacity(listing.len());
        for object in &listing {
            let raw = match self.store.get(&object.key).await {
                Ok(raw) => raw,
                Err(e) => {
                    // Listed but gone, likely removed between list and get.
                    warn!(key = %object.key, error = %e, "skipping unreadable message");
                    continue;
                }
            };
            let uid = uids.uid_for_key(&object.key);
            messages.push(Message::from_object(
                uid,
                object.key.clone(),
                object.size,
                object.last_modified,
                &raw,
                flags.flags_for(&object.key),
            ));
        }
        uids.persist_if_dirty(self.store.as_ref(), &self.user).await?;

        messages.sort_by_key(|m| m.uid);
        cache.insert(folder.name, messages.clone());
        Ok(messages)
    }

    async fn list_source(&self, folder: &'static Folder) -> Result<Vec<ObjectInfo>> {
        match folder.source {
            FolderSource::Prefix(prefix) => self.store.list(prefix).await,
            FolderSource::AllMail | FolderSource::Starred | FolderSource::Important => {
                let mut seen = HashSet::new();
                let mut union = Vec::new();
                for prefix in folder::real_prefixes() {
                    for object in self.store.list(prefix).await? {
                        if seen.insert(object.key.clone()) {
                            union.push(object);
                        }
                    }
                }
                Ok(union)
            }
        }
    }
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn registry() -> (Arc<InMemoryStore>, AccountRegistry) {
        let store = Arc::new(InMemoryStore::new());
        let registry = AccountRegistry::new(store.clone(), Categorizer::new(&[]));
        (store, registry)
    }

    fn inbox() -> &'static Folder {
        folder::resolve("INBOX").unwrap()
    }

    async fn seed_plain(store: &InMemoryStore, key: &str, from: &str, subject: &str) {
        let raw = format!("From: {}\r\nSubject: {}\r\n\r\nbody\r\n", from, subject);
        store.seed(key, raw.as_bytes()).await;
    }

    #[tokio::test]
    async fn test_load_assigns_stable_uids() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "one").await;
        seed_plain(&store, "incoming/c", "x@example.org", "two").await;

        let account = registry.account("chris").await;
        let messages = account.load_folder(inbox(), false).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].uid, 1);
        assert_eq!(messages[1].uid, 2);

        // A key sorting between the two still gets the next UID.
        seed_plain(&store, "incoming/b", "x@example.org", "three").await;
        let messages = account.load_folder(inbox(), true).await.unwrap();
        let b = messages.iter().find(|m| m.storage_key == "incoming/b").unwrap();
        assert_eq!(b.uid, 3);
        // And the list comes back in UID order, not key order.
        let uids: Vec<u32> = messages.iter().map(|m| m.uid).collect();
        assert_eq!(uids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_cache_serves_repeat_loads() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "one").await;

        let account = registry.account("chris").await;
        assert_eq!(account.load_folder(inbox(), false).await.unwrap().len(), 1);

        seed_plain(&store, "incoming/b", "x@example.org", "two").await;
        // Within the TTL the cached view hides the new arrival.
        assert_eq!(account.load_folder(inbox(), false).await.unwrap().len(), 1);
        // A forced reload sees it.
        assert_eq!(account.load_folder(inbox(), true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_detects_count_change() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "one").await;

        let account = registry.account("chris").await;
        account.load_folder(inbox(), false).await.unwrap();

        let (count, changed) = account.refresh(inbox()).await.unwrap();
        assert_eq!((count, changed), (1, false));

        seed_plain(&store, "incoming/b", "x@example.org", "two").await;
        let (count, changed) = account.refresh(inbox()).await.unwrap();
        assert_eq!((count, changed), (2, true));
    }

    #[tokio::test]
    async fn test_flags_survive_another_account_handle() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "one").await;

        let account = registry.account("chris").await;
        account.load_folder(inbox(), false).await.unwrap();
        account
            .apply_flags(
                inbox(),
                &["incoming/a".to_string()],
                FlagOp::Add,
                &["\\Seen".to_string()],
            )
            .await
            .unwrap();

        // A second registry simulates a process restart.
        let registry2 = AccountRegistry::new(store.clone(), Categorizer::new(&[]));
        let account2 = registry2.account("chris").await;
        let messages = account2.load_folder(inbox(), false).await.unwrap();
        assert!(messages[0].has_flag("\\Seen"));
    }

    #[tokio::test]
    async fn test_remove_reports_descending_sequences() {
        let (store, registry) = registry();
        for name in ["a", "b", "c", "d"] {
            seed_plain(&store, &format!("incoming/{}", name), "x@example.org", name).await;
        }

        let account = registry.account("chris").await;
        account.load_folder(inbox(), false).await.unwrap();

        let removed = account
            .remove_messages(
                inbox(),
                &["incoming/b".to_string(), "incoming/d".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(removed.expunged_seqs, vec![4, 2]);
        assert_eq!(removed.remaining, 2);
        assert!(store.get("incoming/b").await.is_err());
    }

    #[tokio::test]
    async fn test_starred_view_follows_flags() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "one").await;
        seed_plain(&store, "incoming/b", "x@example.org", "two").await;

        let account = registry.account("chris").await;
        account.load_folder(inbox(), false).await.unwrap();
        account
            .apply_flags(
                inbox(),
                &["incoming/a".to_string()],
                FlagOp::Add,
                &["\\Flagged".to_string()],
            )
            .await
            .unwrap();

        let starred = folder::resolve("Starred").unwrap();
        let messages = account.load_folder(starred, true).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].storage_key, "incoming/a");
    }

    #[tokio::test]
    async fn test_all_mail_unions_real_folders() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "in").await;
        seed_plain(&store, "sent/b", "chris@example.org", "out").await;

        let account = registry.account("chris").await;
        let all = folder::resolve("All Mail").unwrap();
        let messages = account.load_folder(all, false).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_inbox_reload_runs_categorization() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/gh", "no-reply@github.com", "build passed").await;

        let account = registry.account("chris").await;
        account.load_folder(inbox(), false).await.unwrap();

        let updates = folder::resolve("Updates").unwrap();
        let messages = account.load_folder(updates, false).await.unwrap();
        assert_eq!(messages.len(), 1);
        // The processed set landed in the store.
        assert!(store.get("categorized/chris.json").await.is_ok());
    }

    #[tokio::test]
    async fn test_append_allocates_next_uid() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "one").await;

        let account = registry.account("chris").await;
        account.load_folder(inbox(), false).await.unwrap();

        let drafts = folder::resolve("Drafts").unwrap();
        let uid = account
            .append(drafts, &["\\Draft".to_string()], b"Subject: wip\r\n\r\n...".to_vec())
            .await
            .unwrap();
        assert_eq!(uid, 2);

        let messages = account.load_folder(drafts, false).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].has_flag("\\Draft"));
    }

    #[tokio::test]
    async fn test_copy_lands_in_destination() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "keep").await;

        let account = registry.account("chris").await;
        account.load_folder(inbox(), false).await.unwrap();

        let archive = folder::resolve("Archive").unwrap();
        account
            .copy_messages(&["incoming/a".to_string()], archive)
            .await
            .unwrap();

        assert!(store.get("archive/a").await.is_ok());
        // Copy, not move: the original stays put.
        assert!(store.get("incoming/a").await.is_ok());
    }

    #[tokio::test]
    async fn test_accounts_do_not_share_state() {
        let (store, registry) = registry();
        seed_plain(&store, "incoming/a", "x@example.org", "one").await;

        let chris = registry.account("chris").await;
        let dana = registry.account("dana").await;
        chris.load_folder(inbox(), false).await.unwrap();
        dana.load_folder(inbox(), false).await.unwrap();

        chris
            .apply_flags(
                inbox(),
                &["incoming/a".to_string()],
                FlagOp::Add,
                &["\\Seen".to_string()],
            )
            .await
            .unwrap();

        let messages = dana.load_folder(inbox(), true).await.unwrap();
        assert!(!messages[0].has_flag("\\Seen"));
    }
}
