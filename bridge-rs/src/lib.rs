//! bridge-rs: IMAP/SMTP bridge over an object store
//!
//! Exposes object-store-backed mailboxes to ordinary mail clients:
//! an IMAP4rev1 subset for reading and a submission-only SMTP endpoint
//! that relays outgoing mail through an external delivery service.
//!
//! # Features
//!
//! - **IMAP server**: folders, flags, FETCH/STORE/EXPUNGE/MOVE, IDLE,
//!   APPEND with UIDPLUS, STARTTLS and implicit TLS
//! - **SMTP server**: authenticated submission with relay hand-off and
//!   a best-effort `sent/` archive copy
//! - **Virtual folders**: All Mail, Starred and Important are views
//!   computed from real folders and persisted flags
//! - **Categorization**: inbox mail is sorted into Social, Forums,
//!   Updates and Promotions once per message
//!
//! # Example
//!
//! ```no_run
//! use bridge_rs::account::AccountRegistry;
//! use bridge_rs::categorize::Categorizer;
//! use bridge_rs::config::Config;
//! use bridge_rs::imap::ImapServer;
//! use bridge_rs::security::Authenticator;
//! use bridge_rs::store::InMemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let store = Arc::new(InMemoryStore::new());
//!     let accounts = Arc::new(AccountRegistry::new(
//!         store,
//!         Categorizer::new(&config.categories),
//!     ));
//!     let authenticator = Arc::new(Authenticator::from_config(&config));
//!
//!     let server = Arc::new(ImapServer::new(config, accounts, authenticator, None));
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: configuration management
//! - [`error`]: error types
//! - [`store`]: object store and mail relay traits
//! - [`account`]: per-user UID/flag/cache state
//! - [`mail`]: message metadata and header parsing
//! - [`folder`]: the fixed folder table
//! - [`categorize`]: inbox categorization rules
//! - [`imap`] / [`smtp`]: protocol servers
//! - [`security`]: TLS material and credential checking
//! - [`stream`]: plain/TLS stream unification for STARTTLS

pub mod account;
pub mod categorize;
pub mod config;
pub mod error;
pub mod folder;
pub mod imap;
pub mod mail;
pub mod security;
pub mod smtp;
pub mod store;
pub mod stream;

// Re-export commonly used types
pub use config::Config;
pub use error::{BridgeError, Result};
