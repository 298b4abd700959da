//! Process-wide state threaded through every session, by `Arc` — not a
//! global singleton. Mirrors how the teacher threads `Arc<ProxyInputs>`
//! through `TCPProxy`: the address cache and fake-cert cache are fields of
//! this struct, constructed once in `main` and cloned cheaply per
//! connection.

use std::sync::Arc;

use bypassd_core::drain::DrainWatcher;
use rustls::RootCertStore;

use crate::addrcache::AddressCache;
use crate::allowlist::AllowList;
use crate::ca::CaMaterial;
use crate::certcache::CertCache;
use crate::config::AppConfig;
use crate::doh::DohClient;

pub struct ProxyShared {
    pub config: Arc<AppConfig>,
    pub allow_list: AllowList,
    pub addr_cache: AddressCache,
    pub cert_cache: CertCache,
    pub doh: DohClient,
    pub ca: CaMaterial,
    pub root_store: Arc<RootCertStore>,
    /// Cloned into every in-flight tunnel task for its lifetime, so shutdown
    /// can wait for active tunnels to finish instead of cutting them off.
    pub drain: DrainWatcher,
}

impl ProxyShared {
    pub fn new(config: Arc<AppConfig>, ca: CaMaterial, drain: DrainWatcher) -> anyhow::Result<Self> {
        let doh = DohClient::new(config.doh_endpoint.clone())?;
        let root_store = Arc::new(crate::verifier::native_root_store()?);
        Ok(ProxyShared {
            config,
            allow_list: AllowList::defaults(),
            addr_cache: AddressCache::new(),
            cert_cache: CertCache::new(),
            doh,
            ca,
            root_store,
            drain,
        })
    }
}
