//! Hostname → IP cache.
//!
//! A single `parking_lot::RwLock`-guarded map, mirroring the teacher's
//! `legacy_mtls_cache`/`hbone_mtls_cache` shape in `control/caclient.rs`:
//! many concurrent readers, one writer at a time, no I/O performed while the
//! lock is held. Entries are populated only after a successful TCP dial and
//! are never evicted by TTL (spec non-goal) — the only eviction path is the
//! explicit `evict` call made after a remote TLS handshake failure against a
//! cached address.

use std::collections::HashMap;
use std::net::IpAddr;

use parking_lot::RwLock;

#[derive(Default)]
pub struct AddressCache {
    entries: RwLock<HashMap<String, IpAddr>>,
}

impl AddressCache {
    pub fn new() -> Self {
        AddressCache::default()
    }

    pub fn lookup(&self, host: &str) -> Option<IpAddr> {
        self.entries.read().get(host).copied()
    }

    /// Overwrites any prior entry for `host`, per invariant (ii): only ever
    /// called after a successful dial.
    pub fn store(&self, host: &str, ip: IpAddr) {
        self.entries.write().insert(host.to_string(), ip);
    }

    /// Drops a stale entry so the next attempt falls through to fresh
    /// resolution. See the negative-caching-gap design note.
    pub fn evict(&self, host: &str) {
        self.entries.write().remove(host);
    }
}
