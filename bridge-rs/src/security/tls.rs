//! TLS material for both listeners.
//!
//! Certificates are loaded from PEM files when the config names them.
//! Without files, a self-signed pair is generated next to the system
//! temp dir so STARTTLS works out of the box in development.

use crate::error::{BridgeError, Result};
use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct TlsConfig {
    server_config: Arc<ServerConfig>,
}

impl TlsConfig {
    /// Load certificate chain and PKCS#8 key from PEM files.
    pub fn from_pem_files<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Self> {
        let cert_file = File::open(cert_path.as_ref())
            .map_err(|e| BridgeError::Tls(format!("Failed to open certificate file: {}", e)))?;
        let certs = certs(&mut BufReader::new(cert_file))
            .map_err(|e| BridgeError::Tls(format!("Failed to read certificates: {}", e)))?;
        if certs.is_empty() {
            return Err(BridgeError::Tls("No certificates found in file".to_string()));
        }
        debug!("Loaded {} certificate(s)", certs.len());

        let key_file = File::open(key_path.as_ref())
            .map_err(|e| BridgeError::Tls(format!("Failed to open key file: {}", e)))?;
        let mut keys = pkcs8_private_keys(&mut BufReader::new(key_file))
            .map_err(|e| BridgeError::Tls(format!("Failed to read private keys: {}", e)))?;
        if keys.is_empty() {
            return Err(BridgeError::Tls("No private key found in file".to_string()));
        }
        let private_key = keys.remove(0);

        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(
                certs.into_iter().map(rustls::Certificate).collect(),
                rustls::PrivateKey(private_key),
            )
            .map_err(|e| BridgeError::Tls(format!("Failed to create TLS config: {}", e)))?;

        Ok(Self {
            server_config: Arc::new(config),
        })
    }

    /// TLS material per the config: named PEM files when both paths are
    /// set, otherwise a generated self-signed pair for the domain.
    pub fn load_or_generate(
        cert_path: Option<&str>,
        key_path: Option<&str>,
        domain: &str,
    ) -> Result<Self> {
        if let (Some(cert), Some(key)) = (cert_path, key_path) {
            info!(cert, key, "loading TLS certificate");
            return Self::from_pem_files(cert, key);
        }

        let dir = std::env::temp_dir();
        let cert = dir.join(format!("{}-cert.pem", domain));
        let key = dir.join(format!("{}-key.pem", domain));
        let cert = cert.to_string_lossy().into_owned();
        let key = key.to_string_lossy().into_owned();
        generate_self_signed_cert(domain, &cert, &key)?;
        Self::from_pem_files(&cert, &key)
    }

    /// Acceptor for upgrading a TcpStream, used by STARTTLS and the
    /// implicit-TLS listeners alike.
    pub fn acceptor(&self) -> tokio_rustls::TlsAcceptor {
        tokio_rustls::TlsAcceptor::from(self.server_config.clone())
    }
}

/// Generate a self-signed certificate. Development only.
pub fn generate_self_signed_cert(domain: &str, cert_output: &str, key_output: &str) -> Result<()> {
    use rcgen::{CertificateParams, DistinguishedName};

    info!("Generating self-signed certificate for {}", domain);

    let mut params = CertificateParams::default();
    params.distinguished_name = DistinguishedName::new();
    params.subject_alt_names = vec![
        rcgen::SanType::DnsName(domain.to_string()),
        rcgen::SanType::DnsName(format!("*.{}", domain)),
    ];

    let cert = rcgen::Certificate::from_params(params)
        .map_err(|e| BridgeError::Tls(format!("Failed to generate certificate: {}", e)))?;

    let pem = cert
        .serialize_pem()
        .map_err(|e| BridgeError::Tls(format!("Failed to serialize certificate: {}", e)))?;
    std::fs::write(cert_output, pem)
        .map_err(|e| BridgeError::Tls(format!("Failed to write certificate: {}", e)))?;
    std::fs::write(key_output, cert.serialize_private_key_pem())
        .map_err(|e| BridgeError::Tls(format!("Failed to write private key: {}", e)))?;

    Ok(())
}
