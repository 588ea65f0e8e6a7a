//! Credential checking for both protocols.
//!
//! Users come from the config table, keyed by short username. Clients
//! routinely log in with the full address, so the domain suffix is
//! stripped before lookup.

use crate::config::Config;
use crate::error::{BridgeError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;

/// SMTP authentication mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// PLAIN mechanism (RFC 4616)
    Plain,
    /// LOGIN mechanism
    Login,
}

impl AuthMechanism {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}

pub struct Authenticator {
    /// Short username to password
    users: HashMap<String, String>,
}

impl Authenticator {
    pub fn from_config(config: &Config) -> Self {
        let users = config
            .users
            .iter()
            .map(|(name, user)| (name.clone(), user.password.clone()))
            .collect();
        Self { users }
    }

    /// Check a username/password pair. `chris@example.com` and `chris`
    /// name the same account.
    pub fn verify_login(&self, username: &str, password: &str) -> bool {
        let name = Self::strip_domain(username);
        self.users
            .get(name)
            .map(|expected| expected == password)
            .unwrap_or(false)
    }

    /// Canonical account name for a login string.
    pub fn strip_domain(username: &str) -> &str {
        username.split('@').next().unwrap_or(username)
    }

    /// Decode PLAIN authentication data (RFC 4616)
    ///
    /// The blob is `[authzid] \0 authcid \0 password`; some clients omit
    /// the leading authorization identity entirely.
    pub fn decode_plain_auth(auth_data: &str) -> Result<(String, String)> {
        let decoded = BASE64
            .decode(auth_data.trim())
            .map_err(|e| BridgeError::SmtpProtocol(format!("Invalid base64: {}", e)))?;

        let parts: Vec<&str> = std::str::from_utf8(&decoded)
            .map_err(|e| BridgeError::SmtpProtocol(format!("Invalid UTF-8: {}", e)))?
            .split('\0')
            .collect();

        match parts.len() {
            2 => Ok((parts[0].to_string(), parts[1].to_string())),
            3 => Ok((parts[1].to_string(), parts[2].to_string())),
            _ => Err(BridgeError::SmtpProtocol(
                "Invalid PLAIN auth format".to_string(),
            )),
        }
    }

    /// Decode one LOGIN step (username or password, base64 encoded)
    pub fn decode_login_credential(credential: &str) -> Result<String> {
        let decoded = BASE64
            .decode(credential.trim())
            .map_err(|e| BridgeError::SmtpProtocol(format!("Invalid base64: {}", e)))?;

        String::from_utf8(decoded)
            .map_err(|e| BridgeError::SmtpProtocol(format!("Invalid UTF-8: {}", e)))
    }
}
