use bridge_rs::account::AccountRegistry;
use bridge_rs::categorize::Categorizer;
use bridge_rs::config::{Config, LoggingConfig};
use bridge_rs::imap::ImapServer;
use bridge_rs::security::{Authenticator, TlsConfig};
use bridge_rs::smtp::SmtpServer;
use bridge_rs::store::{InMemoryRelay, InMemoryStore, MailRelay, ObjectStore};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bridge-rs")]
#[command(about = "IMAP/SMTP bridge over an object store", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("bridge_rs={}", logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        "compact" => registry.with(tracing_subscriber::fmt::layer().compact()).init(),
        _ => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if std::path::Path::new(&cli.config).exists() {
        Config::from_file(&cli.config)?
    } else {
        Config::default()
    };
    init_logging(&config.logging);

    info!("🚀 Starting bridge-rs v{}", env!("CARGO_PKG_VERSION"));
    info!("  Domain: {}", config.server.domain);
    info!("  IMAP listening on: {}", config.imap.listen_addr);
    info!("  SMTP listening on: {}", config.smtp.listen_addr);
    info!("  Storage bucket: {}", config.storage.bucket);
    info!("  Users configured: {}", config.users.len());

    let config = Arc::new(config);

    // In-process store and relay; swap these for real clients when the
    // deployment provides endpoints.
    let store: Arc<dyn ObjectStore> = Arc::new(InMemoryStore::new());
    let relay: Arc<dyn MailRelay> = Arc::new(InMemoryRelay::new());

    let authenticator = Arc::new(Authenticator::from_config(&config));
    let accounts = Arc::new(AccountRegistry::new(
        Arc::clone(&store),
        Categorizer::new(&config.categories),
    ));

    let imap_tls = if config.imap.enable_tls {
        Some(TlsConfig::load_or_generate(
            config.imap.tls_cert_path.as_deref(),
            config.imap.tls_key_path.as_deref(),
            &config.server.domain,
        )?)
    } else {
        None
    };
    let smtp_tls = if config.smtp.enable_tls {
        Some(TlsConfig::load_or_generate(
            config.smtp.tls_cert_path.as_deref(),
            config.smtp.tls_key_path.as_deref(),
            &config.server.domain,
        )?)
    } else {
        None
    };

    let imap_server = Arc::new(ImapServer::new(
        Arc::clone(&config),
        Arc::clone(&accounts),
        Arc::clone(&authenticator),
        imap_tls,
    ));
    let imap_handle = tokio::spawn(async move { imap_server.run().await });

    let smtp_server = Arc::new(SmtpServer::new(
        Arc::clone(&config),
        Arc::clone(&store),
        Arc::clone(&relay),
        Arc::clone(&authenticator),
        smtp_tls,
    ));
    let smtp_handle = tokio::spawn(async move { smtp_server.run().await });

    // Both servers run until failure; exit when the first one stops.
    tokio::select! {
        result = imap_handle => {
            match result {
                Ok(Ok(())) => info!("IMAP server exited"),
                Ok(Err(e)) => error!("IMAP server error: {}", e),
                Err(e) => error!("IMAP task panic: {}", e),
            }
        }
        result = smtp_handle => {
            match result {
                Ok(Ok(())) => info!("SMTP server exited"),
                Ok(Err(e)) => error!("SMTP server error: {}", e),
                Err(e) => error!("SMTP task panic: {}", e),
            }
        }
    }

    Ok(())
}
