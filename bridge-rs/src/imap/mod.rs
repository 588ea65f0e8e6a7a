//! IMAP server implementation
//!
//! A focused IMAP4rev1 subset over the object store:
//! - [`server`]: TCP/TLS listeners and the per-connection loop
//! - [`session`]: session state machine and command handlers
//! - [`commands`]: command line parsing
//! - [`response`]: untagged response and FETCH item formatting

pub mod commands;
pub mod response;
pub mod server;
pub mod session;

pub use commands::ImapCommand;
pub use server::ImapServer;
pub use session::{ImapSession, SessionAction};
