//! Error taxonomy for a single tunnel attempt.
//!
//! Every fallible step in the session driver returns `Result<_, TunnelError>`
//! and propagates with `?`. There is exactly one recovery point, in
//! [`crate::session`], which converts any `Err` into a best-effort 500 reply
//! on the raw client socket and a `warn!` log line. No error from one tunnel
//! affects any other.

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("malformed certificate in upstream chain: {0}")]
    CertParse(String),

    #[error("upstream certificate failed verification for {host} and all allow-list fallbacks: {source}")]
    Verify {
        host: String,
        #[source]
        source: rustls::Error,
    },

    #[error("DNS-over-HTTPS resolution failed for {name}: {reason}")]
    Resolve { name: String, reason: String },

    #[error("no candidate address for {host} accepted a TCP connection")]
    Dial { host: String },

    #[error("TLS handshake failed ({side}): {source}")]
    Handshake {
        side: HandshakeSide,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error relaying bytes: {0}")]
    Pipe(#[from] std::io::Error),

    #[error("host {0} is on the blackhole list")]
    Blocked(String),
}

#[derive(Debug, Clone, Copy)]
pub enum HandshakeSide {
    Client,
    Remote,
}

impl std::fmt::Display for HandshakeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandshakeSide::Client => write!(f, "client"),
            HandshakeSide::Remote => write!(f, "remote"),
        }
    }
}

impl TunnelError {
    /// Whether this error should trigger eviction of a cached address and a
    /// same-attempt re-resolution (the negative-caching improvement). Both
    /// a remote TLS handshake I/O failure and a certificate-verification
    /// failure against a cached IP mean that address is no longer worth
    /// keeping.
    pub fn should_evict_address(&self) -> bool {
        matches!(
            self,
            TunnelError::Handshake {
                side: HandshakeSide::Remote,
                ..
            } | TunnelError::Verify { .. }
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("failed to bind listener on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("CA material error: {0}")]
    Ca(#[from] anyhow::Error),
}
