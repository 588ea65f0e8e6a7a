//! SMTP submission server (RFC 5321 subset)
//!
//! - [`server`]: TCP/TLS listeners
//! - [`session`]: session state machine, AUTH and STARTTLS handling
//! - [`commands`]: command line parsing

pub mod commands;
pub mod server;
pub mod session;

pub use commands::SmtpCommand;
pub use server::SmtpServer;
pub use session::SmtpSession;
