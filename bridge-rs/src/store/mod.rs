//! External collaborators: object storage and the mail relay
//!
//! The bridge never talks to the network storage or relay service
//! directly; everything goes through these two traits. The signed-request
//! transport lives behind them and is out of scope here.

use crate::error::Result;
use chrono::{DateTime, Utc};

mod memory;

pub use memory::{InMemoryRelay, InMemoryStore};

/// Listing entry returned by [`ObjectStore::list`]
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: usize,
    pub last_modified: DateTime<Utc>,
}

/// Key/value blob storage with list-by-prefix
///
/// The bucket is fixed at client construction; keys are paths like
/// `incoming/abc123` or `flags/chris.json`.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under a key prefix, in key order
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Fetch an object's bytes
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Create or overwrite an object
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<()>;

    /// Remove an object; removing a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Hand-off to the managed mail delivery service
#[async_trait::async_trait]
pub trait MailRelay: Send + Sync {
    /// Submit a fully-formed RFC 2822 message; returns the relay's message id
    async fn send_raw(&self, source: &str, recipients: &[String], raw: &[u8]) -> Result<String>;
}
