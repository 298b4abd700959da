//! Lazily-minted per-host leaf certificates, signed by the process CA.
//!
//! Grounded on the teacher's CSR-generation shape in `control/caclient.rs`
//! (`rcgen::CertificateParams` + `KeyPair::generate`) and on `lexe-tls`'s
//! `build_rcgen_cert` builder idiom. Cache semantics mirror spec.md §4.3:
//! last-writer-wins on a concurrent first-touch race, never evicted.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rcgen::{CertificateParams, KeyPair};
use rustls::ServerConfig;
use rustls::pki_types::PrivateKeyDer;
use rustls::sign::CertifiedKey;

use crate::ca::CaMaterial;

#[derive(Default)]
pub struct CertCache {
    entries: RwLock<HashMap<String, Arc<ServerConfig>>>,
}

impl CertCache {
    pub fn new() -> Self {
        CertCache::default()
    }

    /// Returns the server TLS config for `host`, minting and caching a fresh
    /// leaf on miss. Minting is synchronous; a redundant mint on a
    /// concurrent first-touch race is accepted (last writer wins).
    pub fn cert_for(&self, host: &str, ca: &CaMaterial) -> anyhow::Result<Arc<ServerConfig>> {
        if let Some(config) = self.entries.read().get(host) {
            return Ok(config.clone());
        }

        let config = Arc::new(mint_leaf_config(host, ca)?);
        self.entries.write().insert(host.to_string(), config.clone());
        Ok(config)
    }
}

fn mint_leaf_config(host: &str, ca: &CaMaterial) -> anyhow::Result<ServerConfig> {
    let key_pair = KeyPair::generate()?;
    let params = CertificateParams::new(vec![host.to_string()])?;

    let issuer = ca.issuer()?;
    let cert = params.signed_by(&key_pair, &issuer)?;

    let cert_der = cert.der().clone();
    let key_der = PrivateKeyDer::try_from(key_pair.serialize_der()).map_err(|e| anyhow::anyhow!("{e}"))?;

    let certified_key = CertifiedKey::new(vec![cert_der], rustls::crypto::aws_lc_rs::sign::any_supported_type(&key_der)?);

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SingleCertResolver(Arc::new(certified_key))));
    Ok(config)
}

struct SingleCertResolver(Arc<CertifiedKey>);

impl rustls::server::ResolvesServerCert for SingleCertResolver {
    fn resolve(&self, _client_hello: rustls::server::ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.clone())
    }
}
