//! In-memory object store and relay
//!
//! Used by the server wiring when no external endpoint is configured, and
//! by every test. Listing is in key order, matching what a real bucket
//! returns.

use super::{MailRelay, ObjectInfo, ObjectStore};
use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    last_modified: DateTime<Utc>,
}

/// Object store backed by a sorted in-process map
#[derive(Default)]
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object for test setup
    pub async fn seed(&self, key: &str, data: &[u8]) {
        self.put(key, data.to_vec(), "message/rfc822")
            .await
            .expect("in-memory put cannot fail");
    }

    /// Content type recorded for an object
    pub async fn content_type(&self, key: &str) -> Option<String> {
        let objects = self.objects.read().await;
        objects.get(key).map(|obj| obj.content_type.clone())
    }
}

#[async_trait::async_trait]
impl ObjectStore for InMemoryStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let objects = self.objects.read().await;
        let listed = objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, obj)| ObjectInfo {
                key: key.clone(),
                size: obj.data.len(),
                last_modified: obj.last_modified,
            })
            .collect();
        Ok(listed)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|obj| obj.data.clone())
            .ok_or_else(|| BridgeError::Storage(format!("no such key: {}", key)))
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        debug!("put {} ({} bytes)", key, data.len());
        let mut objects = self.objects.write().await;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!("delete {}", key);
        let mut objects = self.objects.write().await;
        objects.remove(key);
        Ok(())
    }
}

/// One message captured by [`InMemoryRelay`]
#[derive(Debug, Clone)]
pub struct RelayedMessage {
    pub message_id: String,
    pub source: String,
    pub recipients: Vec<String>,
    pub raw: Vec<u8>,
}

/// Relay that records submissions instead of delivering them
#[derive(Default)]
pub struct InMemoryRelay {
    sent: Mutex<Vec<RelayedMessage>>,
    fail_next: AtomicBool,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `send_raw` call fail, for error-path tests
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<RelayedMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl MailRelay for InMemoryRelay {
    async fn send_raw(&self, source: &str, recipients: &[String], raw: &[u8]) -> Result<String> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::Relay("simulated relay outage".to_string()));
        }

        let message_id = format!("<{}@relay>", uuid::Uuid::new_v4());
        let mut sent = self.sent.lock().await;
        sent.push(RelayedMessage {
            message_id: message_id.clone(),
            source: source.to_string(),
            recipients: recipients.to_vec(),
            raw: raw.to_vec(),
        });
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_by_prefix() {
        let store = InMemoryStore::new();
        store.seed("incoming/a", b"one").await;
        store.seed("incoming/b", b"two").await;
        store.seed("sent/c", b"three").await;

        let incoming = store.list("incoming/").await.unwrap();
        assert_eq!(incoming.len(), 2);
        assert_eq!(incoming[0].key, "incoming/a");
        assert_eq!(incoming[1].key, "incoming/b");

        let all = store.list("").await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_get_put_delete() {
        let store = InMemoryStore::new();
        store
            .put("flags/chris.json", b"{}".to_vec(), "application/json")
            .await
            .unwrap();

        assert_eq!(store.get("flags/chris.json").await.unwrap(), b"{}");
        assert_eq!(
            store.content_type("flags/chris.json").await.as_deref(),
            Some("application/json")
        );

        store.delete("flags/chris.json").await.unwrap();
        assert!(store.get("flags/chris.json").await.is_err());

        // Deleting a missing key is fine
        store.delete("flags/chris.json").await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_records_and_fails_on_demand() {
        let relay = InMemoryRelay::new();
        let id = relay
            .send_raw("a@x.com", &["b@y.com".to_string()], b"Subject: hi\r\n\r\nhello")
            .await
            .unwrap();
        assert!(id.starts_with('<'));

        relay.fail_next();
        assert!(relay
            .send_raw("a@x.com", &["b@y.com".to_string()], b"again")
            .await
            .is_err());

        let sent = relay.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["b@y.com"]);
    }
}
