use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("IMAP protocol error: {0}")]
    ImapProtocol(String),

    #[error("Object store error: {0}")]
    Storage(String),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Unknown folder: {0}")]
    UnknownFolder(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
