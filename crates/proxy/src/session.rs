//! Per-CONNECT MITM session driver.
//!
//! Grounded on `proxy/tcpproxy.rs`'s `TCPProxy::proxy`/`proxy_internal`
//! split: [`run_tunnel`] is the public entry point that owns timing and the
//! single recovery point, delegating to [`run_tunnel_internal`] which
//! returns a plain `Result`. No panics are used for control flow — the
//! redesign spec.md §9 asks for.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::doh::Answer;
use crate::error::TunnelError;
use crate::shared::ProxyShared;
use crate::verifier::AllowListFallbackVerifier;

const CLIENT_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(5);

/// Drives one hijacked CONNECT end to end. On any fatal error, writes a
/// best-effort 500 status line to the raw client socket and logs a `warn!`
/// — this is the one recovery point for the whole tunnel. Errors in one
/// tunnel never affect any other.
pub async fn run_tunnel<C>(shared: Arc<ProxyShared>, host: String, port: u16, client: C)
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let mut client = client;
    match run_tunnel_internal(&shared, &host, port, &mut client).await {
        Ok(()) => {
            tracing::debug!(host, "tunnel closed");
        }
        Err(e) => {
            tracing::warn!(host, error = %e, "tunnel failed");
            let _ = client.write_all(b"HTTP/1.1 500 Cannot reach destination\r\n\r\n").await;
        }
    }
}

async fn run_tunnel_internal<C>(shared: &Arc<ProxyShared>, host: &str, port: u16, client: &mut C) -> Result<(), TunnelError>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let server_config = shared
        .cert_cache
        .cert_for(host, &shared.ca)
        .map_err(|e| TunnelError::CertParse(e.to_string()))?;
    let acceptor = TlsAcceptor::from(server_config);

    let client_tls = tokio::time::timeout(CLIENT_HANDSHAKE_DEADLINE, acceptor.accept(&mut *client))
        .await
        .map_err(|_| {
            TunnelError::Handshake {
                side: crate::error::HandshakeSide::Client,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "client handshake deadline exceeded"),
            }
        })?
        .map_err(|e| TunnelError::Handshake {
            side: crate::error::HandshakeSide::Client,
            source: e,
        })?;

    let remote_tls = connect_remote(shared, host, port).await?;

    crate::pump::pipe(client_tls, remote_tls).await?;
    Ok(())
}

/// Dials and TLS-handshakes the remote, retrying once within the same
/// attempt if the first try fails in a way [`TunnelError::should_evict_address`]
/// flags as address-invalidating: the cache entry is evicted and dialing
/// falls through to fresh DoH resolution before handshaking again.
async fn connect_remote(
    shared: &Arc<ProxyShared>,
    host: &str,
    port: u16,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TunnelError> {
    match connect_remote_once(shared, host, port).await {
        Ok(tls) => Ok(tls),
        Err(e) if e.should_evict_address() => {
            shared.addr_cache.evict(host);
            connect_remote_once(shared, host, port).await
        }
        Err(e) => Err(e),
    }
}

async fn connect_remote_once(
    shared: &Arc<ProxyShared>,
    host: &str,
    port: u16,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TunnelError> {
    let remote = dial_remote(shared, host, port).await?;
    handshake_remote(shared, host, remote).await
}

/// Resolves and dials `host:port`, preferring a cached address. A dial
/// failure against the cached address falls through to fresh DoH
/// resolution within the same attempt; a remote TLS handshake failure is
/// handled one level up, in [`connect_remote`], which evicts and retries
/// the whole dial-then-handshake sequence once.
async fn dial_remote(shared: &Arc<ProxyShared>, host: &str, port: u16) -> Result<TcpStream, TunnelError> {
    if let Some(ip) = shared.addr_cache.lookup(host) {
        if let Ok(stream) = TcpStream::connect(SocketAddr::new(ip, port)).await {
            return Ok(stream);
        }
        shared.addr_cache.evict(host);
    }

    let answers = shared.doh.resolve_a(host).await?;
    for candidate in dial_order(&answers) {
        if let Ok(stream) = TcpStream::connect(SocketAddr::new(candidate, port)).await {
            shared.addr_cache.store(host, candidate);
            return Ok(stream);
        }
    }

    Err(TunnelError::Dial { host: host.to_string() })
}

fn dial_order(answers: &[Answer]) -> Vec<IpAddr> {
    answers.iter().filter_map(|a| a.data.parse().ok()).collect()
}

async fn handshake_remote(
    shared: &Arc<ProxyShared>,
    host: &str,
    stream: TcpStream,
) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TunnelError> {
    let verifier = AllowListFallbackVerifier::new(shared.root_store.clone(), shared.allow_list.allowed_hostnames().map(String::from).collect())
        .map_err(|e| TunnelError::CertParse(e.to_string()))?;

    let client_config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));

    let server_name = ServerName::try_from(host.to_string()).map_err(|_| TunnelError::CertParse(format!("invalid hostname: {host}")))?;

    connector.connect(server_name, stream).await.map_err(|e| classify_remote_handshake_error(host, e))
}

/// Certificate-verification failures surface from `rustls` as an `io::Error`
/// wrapping a `rustls::Error`; everything else (connection reset mid
/// handshake, protocol violations) stays a generic [`TunnelError::Handshake`].
/// Distinguishing the two gives [`TunnelError::should_evict_address`] a real
/// verification-specific variant to match on, per spec.md §7's `VerifyError`.
fn classify_remote_handshake_error(host: &str, e: std::io::Error) -> TunnelError {
    if e.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()) {
        if let Some(source) = e.into_inner().and_then(|inner| inner.downcast::<rustls::Error>().ok()) {
            return TunnelError::Verify {
                host: host.to_string(),
                source: *source,
            };
        }
        return TunnelError::Handshake {
            side: crate::error::HandshakeSide::Remote,
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, "certificate verification failed"),
        };
    }

    TunnelError::Handshake {
        side: crate::error::HandshakeSide::Remote,
        source: e,
    }
}
