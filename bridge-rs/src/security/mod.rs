//! Authentication and TLS.
//!
//! - [`auth`]: credential checks and SASL decoding (PLAIN, LOGIN)
//! - [`tls`]: certificate loading and STARTTLS acceptors

pub mod auth;
pub mod tls;

pub use auth::{AuthMechanism, Authenticator};
pub use tls::TlsConfig;
