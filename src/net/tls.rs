use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use wtransport::Identity;

// Dev certificate paths (generated by scripts/gen-dev-cert.rs or on first start)
const DEV_CERT_DIR: &str = "certs";
const DEV_CERT_FILE: &str = "certs/cert.pem";
const DEV_KEY_FILE: &str = "certs/key.pem";

/// Browsers only accept pinned certificate hashes for certificates valid at
/// most 14 days
const DEV_CERT_VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// TLS configuration for the WebTransport endpoint
pub struct TlsConfig {
    pub identity: Identity,
    /// Base64-encoded SHA-256 hash of the certificate (for serverCertificateHashes)
    pub cert_hash: String,
}

impl TlsConfig {
    /// Load TLS configuration
    ///
    /// Production: explicit cert/key paths (TLS_CERT_PATH / TLS_KEY_PATH).
    /// Development: certs/ in the working directory, generated if missing.
    pub async fn load(cert_path: Option<&str>, key_path: Option<&str>) -> Result<Self> {
        if let (Some(cert), Some(key)) = (cert_path, key_path) {
            info!("Loading TLS certificate from {}", cert);
            return Self::load_from_paths(cert, key).await;
        }

        let expired = dev_cert_expired(DEV_CERT_FILE);
        if !Path::new(DEV_CERT_FILE).exists() || !Path::new(DEV_KEY_FILE).exists() || expired {
            if expired {
                warn!("Dev certificate is older than its validity window, regenerating");
            }
            generate_dev_cert(Path::new(DEV_CERT_DIR))?;
        }

        info!("Loading dev certificate from {}/", DEV_CERT_DIR);
        Self::load_from_paths(DEV_CERT_FILE, DEV_KEY_FILE).await
    }

    async fn load_from_paths(cert_path: &str, key_path: &str) -> Result<Self> {
        let identity = Identity::load_pemfiles(cert_path, key_path)
            .await
            .with_context(|| format!("Failed to load certificate from {} / {}", cert_path, key_path))?;

        let cert_hash = identity
            .certificate_chain()
            .as_slice()
            .first()
            .map(|cert| cert_hash_from_der(cert.der()))
            .unwrap_or_default();

        info!("Certificate hash: {}", cert_hash);
        Ok(Self {
            identity,
            cert_hash,
        })
    }

    pub fn cert_hash(&self) -> &str {
        &self.cert_hash
    }
}

/// Base64 SHA-256 of a DER certificate
pub fn cert_hash_from_der(der: &[u8]) -> String {
    STANDARD.encode(digest(&SHA256, der).as_ref())
}

fn dev_cert_expired(cert_path: &str) -> bool {
    std::fs::metadata(cert_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= DEV_CERT_VALIDITY)
}

/// Write a self-signed localhost certificate and key as PEM into `dir`
pub fn generate_dev_cert(dir: &Path) -> Result<String> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])
        .context("Invalid certificate subject names")?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "Cashout Arena Dev");

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + DEV_CERT_VALIDITY).into();

    let key_pair = KeyPair::generate().context("Failed to generate key pair")?;
    let cert = params
        .self_signed(&key_pair)
        .context("Failed to self-sign certificate")?;

    std::fs::write(dir.join("cert.pem"), cert.pem()).context("Failed to write cert.pem")?;
    std::fs::write(dir.join("key.pem"), key_pair.serialize_pem()).context("Failed to write key.pem")?;

    let hash = cert_hash_from_der(cert.der());
    info!("Generated dev certificate in {}", dir.display());
    Ok(hash)
}
