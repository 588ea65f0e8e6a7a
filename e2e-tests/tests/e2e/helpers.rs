use std::sync::Arc;
use std::time::Duration;

use bridge_rs::account::AccountRegistry;
use bridge_rs::categorize::Categorizer;
use bridge_rs::config::{Config, UserConfig};
use bridge_rs::imap::ImapServer;
use bridge_rs::security::tls::generate_self_signed_cert;
use bridge_rs::security::{Authenticator, TlsConfig};
use bridge_rs::smtp::SmtpServer;
use bridge_rs::store::{InMemoryRelay, InMemoryStore};
use tokio::net::TcpListener;

pub const TEST_DOMAIN: &str = "test.example.com";
pub const TEST_USER: &str = "chris";
pub const TEST_PASSWORD: &str = "test-password-123";

/// Both servers running in-process on ephemeral ports, backed by a
/// shared in-memory store and a capturing relay.
pub struct TestEnv {
    pub imap_addr: String,
    pub smtp_addr: String,
    pub store: Arc<InMemoryStore>,
    pub relay: Arc<InMemoryRelay>,
    _tls_dir: tempfile::TempDir,
}

impl TestEnv {
    /// Start both servers with the default test account.
    pub async fn start() -> Self {
        Self::start_with_users(&[(TEST_USER, TEST_PASSWORD)]).await
    }

    pub async fn start_with_users(users: &[(&str, &str)]) -> Self {
        let mut config = Config::default();
        config.server.domain = TEST_DOMAIN.to_string();
        config.server.hostname = format!("bridge.{}", TEST_DOMAIN);
        for (name, password) in users {
            config.users.insert(
                (*name).to_string(),
                UserConfig {
                    password: (*password).to_string(),
                    email: format!("{}@{}", name, TEST_DOMAIN),
                },
            );
        }
        let config = Arc::new(config);

        // Certificates live in a per-env temp dir so parallel test
        // binaries never race on a shared PEM file.
        let tls_dir = tempfile::tempdir().expect("create TLS temp dir");
        let cert = tls_dir.path().join("cert.pem");
        let key = tls_dir.path().join("key.pem");
        generate_self_signed_cert(
            TEST_DOMAIN,
            cert.to_str().unwrap(),
            key.to_str().unwrap(),
        )
        .expect("generate test certificate");
        let tls = TlsConfig::from_pem_files(&cert, &key).expect("load test certificate");

        let store = Arc::new(InMemoryStore::new());
        let relay = Arc::new(InMemoryRelay::new());
        let authenticator = Arc::new(Authenticator::from_config(&config));
        let accounts = Arc::new(AccountRegistry::new(
            store.clone(),
            Categorizer::new(&config.categories),
        ));

        let imap_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind IMAP listener");
        let imap_addr = imap_listener.local_addr().unwrap().to_string();
        let imap = Arc::new(ImapServer::new(
            config.clone(),
            accounts,
            authenticator.clone(),
            Some(tls.clone()),
        ));
        tokio::spawn(async move {
            let _ = imap.serve(imap_listener, false).await;
        });

        let smtp_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind SMTP listener");
        let smtp_addr = smtp_listener.local_addr().unwrap().to_string();
        let smtp = Arc::new(SmtpServer::new(
            config,
            store.clone(),
            relay.clone(),
            authenticator,
            Some(tls),
        ));
        tokio::spawn(async move {
            let _ = smtp.serve(smtp_listener, false).await;
        });

        Self {
            imap_addr,
            smtp_addr,
            store,
            relay,
            _tls_dir: tls_dir,
        }
    }

    /// Drop a small RFC 2822 message under `incoming/<name>`.
    pub async fn seed_inbox(&self, name: &str, from: &str, subject: &str, body: &str) {
        let raw = format!(
            "From: {}\r\nTo: chris@{}\r\nSubject: {}\r\nDate: Thu, 21 Aug 2025 10:00:00 +0000\r\nMessage-ID: <{}@{}>\r\n\r\n{}\r\n",
            from, TEST_DOMAIN, subject, name, TEST_DOMAIN, body
        );
        self.store
            .seed(&format!("incoming/{}", name), raw.as_bytes())
            .await;
    }
}

/// Test result helper
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn success(name: String, duration: Duration) -> Self {
        Self {
            name,
            passed: true,
            message: "✅ Test passed".to_string(),
            duration,
        }
    }

    pub fn failure(name: String, message: String, duration: Duration) -> Self {
        Self {
            name,
            passed: false,
            message: format!("❌ Test failed: {}", message),
            duration,
        }
    }

    pub fn print(&self) {
        println!("\n{}", "=".repeat(80));
        println!("📝 Test: {}", self.name);
        println!("⏱️  Duration: {:?}", self.duration);
        println!("{}", self.message);
        println!("{}", "=".repeat(80));
    }
}

/// Generate a unique suffix for test subjects
pub fn generate_test_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    format!("test_{}", timestamp)
}
