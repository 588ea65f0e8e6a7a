pub mod helpers;
pub mod imap_client;
pub mod smtp_client;
