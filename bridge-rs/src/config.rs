use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub imap: ImapConfig,
    pub smtp: SmtpConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub users: HashMap<String, UserConfig>,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Mail domain announced in greetings and enforced on MAIL FROM
    pub domain: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImapConfig {
    pub listen_addr: String,
    /// Implicit-TLS listener (IMAPS); only bound when TLS is enabled
    pub tls_listen_addr: Option<String>,
    pub enable_tls: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub listen_addr: String,
    /// Implicit-TLS listener (SMTPS); only bound when TLS is enabled
    pub tls_listen_addr: Option<String>,
    pub enable_tls: bool,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub max_message_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Object store bucket holding all mailbox state
    pub bucket: String,
    /// Key prefix prepended by the store client, not by key-building code
    #[serde(default)]
    pub prefix: String,
}

/// One entry of the credential table: `username -> {password, email}`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub password: String,
    pub email: String,
}

/// Override for one built-in category's match patterns
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub substrings: Vec<String>,
    #[serde(default)]
    pub headers: Vec<HeaderRuleConfig>,
}

/// Header predicate: empty `values` matches on presence alone
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeaderRuleConfig {
    pub header: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::BridgeError::Config(e.to_string()))?;

        toml::from_str(&content).map_err(|e| crate::error::BridgeError::Config(e.to_string()))
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig {
                domain: "localhost".to_string(),
                hostname: "bridge.localhost".to_string(),
            },
            imap: ImapConfig {
                listen_addr: "0.0.0.0:1143".to_string(),
                tls_listen_addr: None,
                enable_tls: false,
                tls_cert_path: None,
                tls_key_path: None,
            },
            smtp: SmtpConfig {
                listen_addr: "0.0.0.0:2525".to_string(),
                tls_listen_addr: None,
                enable_tls: false,
                tls_cert_path: None,
                tls_key_path: None,
                max_message_size: 10 * 1024 * 1024, // 10MB
            },
            storage: StorageConfig {
                bucket: "mail".to_string(),
                prefix: String::new(),
            },
            users: HashMap::new(),
            categories: Vec::new(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [server]
            domain = "test.example.com"
            hostname = "bridge.test.example.com"

            [imap]
            listen_addr = "127.0.0.1:1143"
            enable_tls = false

            [smtp]
            listen_addr = "127.0.0.1:2525"
            enable_tls = false
            max_message_size = 1048576

            [storage]
            bucket = "mail-test"

            [logging]
            level = "debug"
            format = "compact"

            [users.chris]
            password = "test-password-123"
            email = "chris@test.example.com"

            [[categories]]
            name = "promotions"
            domains = ["deals.example.com"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.domain, "test.example.com");
        assert_eq!(config.users["chris"].email, "chris@test.example.com");
        assert_eq!(config.categories.len(), 1);
        assert_eq!(config.categories[0].domains, vec!["deals.example.com"]);
        assert!(config.imap.tls_cert_path.is_none());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.smtp.enable_tls);
        assert!(config.users.is_empty());
        assert_eq!(config.storage.bucket, "mail");
    }
}
