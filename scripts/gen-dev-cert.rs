//! Dev certificate generator - run with `cargo run --manifest-path scripts/Cargo.toml [-- --force]`
//!
//! Writes a self-signed localhost certificate for the arena's WebTransport
//! endpoint and prints the hash browsers pin via `serverCertificateHashes`.
//! The server regenerates the same files on start when they are missing or
//! expired; this helper exists for setting up clients ahead of time.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use ring::digest::{digest, SHA256};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

const CERT_DIR: &str = "../certs";
const CERT_FILE: &str = "../certs/cert.pem";
const KEY_FILE: &str = "../certs/key.pem";

/// Browsers refuse pinned hashes for certificates valid longer than 14 days
const VALIDITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let force = std::env::args().any(|arg| arg == "--force");

    if !force && Path::new(CERT_FILE).exists() && Path::new(KEY_FILE).exists() {
        if is_expired(CERT_FILE) {
            println!("Certificate at {} has expired, regenerating", CERT_FILE);
        } else {
            println!("Certificates already exist at {}/ (pass --force to regenerate)", CERT_DIR);
            print_hash()?;
            return Ok(());
        }
    }

    println!("Generating Cashout Arena development certificate...\n");
    fs::create_dir_all(CERT_DIR)?;

    let mut params = CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, "Cashout Arena Dev");

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + VALIDITY).into();

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    fs::write(CERT_FILE, cert.pem())?;
    fs::write(KEY_FILE, key_pair.serialize_pem())?;
    println!("Certificate saved to {}", CERT_FILE);
    println!("Private key saved to {}\n", KEY_FILE);

    print_hash()
}

fn is_expired(path: &str) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= VALIDITY)
}

fn print_hash() -> Result<(), Box<dyn std::error::Error>> {
    let cert_pem = fs::read_to_string(CERT_FILE)?;
    let pem = pem::parse(&cert_pem)?;
    let hash = STANDARD.encode(digest(&SHA256, pem.contents()).as_ref());

    println!("WebTransport certificate hash (serverCertificateHashes):");
    println!("  {}", hash);
    Ok(())
}
