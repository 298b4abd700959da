//! Process CA bootstrap: load from disk, or generate and persist on first run.
//!
//! Grounded on `lexe-tls`'s `build_rcgen_cert` pattern for constructing an
//! `rcgen::Certificate` from `CertificateParams` plus a `KeyPair`; the CA
//! variant here sets `IsCa::Ca(BasicConstraints::Unconstrained)` instead of
//! the leaf-cert defaults that crate uses.

use std::path::{Path, PathBuf};

use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair};

const CA_CERT_FILE: &str = "bypassd-ca-cert.pem";
const CA_KEY_FILE: &str = "bypassd-ca-key.pem";
const CA_COMMON_NAME: &str = "bypassd local MITM CA";

/// The process-wide CA: referenced (never copied) by every minted leaf, per
/// invariant (iv).
pub struct CaMaterial {
    pub cert_der: rcgen::CertificateDer<'static>,
    pub key_pair: KeyPair,
}

impl CaMaterial {
    pub fn issuer(&self) -> anyhow::Result<Issuer<'_, KeyPair>> {
        let params = CertificateParams::from_ca_cert_der(&self.cert_der)?;
        Ok(Issuer::new(params, &self.key_pair))
    }
}

/// Loads CA material from `dir`, or generates and persists fresh material if
/// either file is absent.
pub fn load_or_generate(dir: &Path) -> anyhow::Result<CaMaterial> {
    let cert_path = dir.join(CA_CERT_FILE);
    let key_path = dir.join(CA_KEY_FILE);

    if cert_path.exists() && key_path.exists() {
        return load(&cert_path, &key_path);
    }

    std::fs::create_dir_all(dir)?;
    let material = generate()?;
    std::fs::write(&cert_path, material.cert_pem.as_bytes())?;
    std::fs::write(&key_path, material.key_pair.serialize_pem().as_bytes())?;
    tracing::info!(
        cert = %cert_path.display(),
        "generated new CA; install this certificate as trusted for intercepted hosts to appear valid"
    );

    Ok(CaMaterial {
        cert_der: material.cert_der,
        key_pair: material.key_pair,
    })
}

struct Generated {
    cert_der: rcgen::CertificateDer<'static>,
    cert_pem: String,
    key_pair: KeyPair,
}

fn generate() -> anyhow::Result<Generated> {
    let key_pair = KeyPair::generate()?;
    let mut params = CertificateParams::new(Vec::new())?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, CA_COMMON_NAME);
    params.distinguished_name = name;

    let cert = params.self_signed(&key_pair)?;
    let cert_pem = cert.pem();
    let cert_der = cert.der().clone();

    Ok(Generated {
        cert_der,
        cert_pem,
        key_pair,
    })
}

fn load(cert_path: &Path, key_path: &Path) -> anyhow::Result<CaMaterial> {
    let cert_pem = std::fs::read_to_string(cert_path)?;
    let key_pem = std::fs::read_to_string(key_path)?;

    let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .next()
        .ok_or_else(|| anyhow::anyhow!("no certificate found in {}", cert_path.display()))??;

    let key_pair = KeyPair::from_pem(&key_pem)?;

    Ok(CaMaterial { cert_der, key_pair })
}

/// Default CA material directory: an OS-appropriate config dir, falling back
/// to the current directory if unavailable.
pub fn default_ca_dir() -> PathBuf {
    dirs_like_default().join("bypassd")
}

fn dirs_like_default() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}
