//! End-to-end scenario tests. Each scenario drives the real `session`/
//! `frontend` code paths (`session::run_tunnel`, or `frontend::serve` for
//! the one scenario that doesn't need to dial anywhere) against a mocked
//! DoH endpoint and a loopback "fake origin" TLS server standing in for the
//! real upstream — never the lower-level `DohClient`/`AddressCache`/
//! `AllowListFallbackVerifier` pieces directly, so a regression in the
//! wiring between them (e.g. a missed cache write-through) actually fails
//! a test here.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bypassd_proxy::ProxyShared;
use rcgen::{CertificateParams, Issuer, KeyPair};
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ensure_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// S1 Blackhole: a blackholed host is rejected by the real frontend listener
/// without ever reaching the resolver. This is the one scenario that can
/// run against the real `frontend::serve`/`handle` dispatch without dialing
/// anything (the Allow/Default branches would need to bind an allow-listed
/// name's real port, which this sandbox can't do), so it's the scenario
/// that exercises that code directly; the rest drive `session::run_tunnel`.
#[tokio::test]
async fn s1_blackhole_rejected_by_real_frontend_without_resolving() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"Status": 0, "Answer": []})))
        .expect(0)
        .mount(&mock_server)
        .await;

    let listen_addr: SocketAddr = format!("127.0.0.1:{}", free_port()).parse().unwrap();
    let shared = test_shared(&doh_uri(&mock_server), listen_addr, RootCertStore::empty()).await;
    tokio::spawn(bypassd_proxy::frontend::serve(shared));
    wait_for_listener(listen_addr).await;

    let mut stream = TcpStream::connect(listen_addr).await.unwrap();
    stream
        .write_all(b"CONNECT www.google.com:443 HTTP/1.1\r\nHost: www.google.com:443\r\n\r\n")
        .await
        .unwrap();
    let headers = read_http_response_headers(&mut stream).await;
    assert!(headers.starts_with("HTTP/1.1 403"), "expected a 403 for a blackholed host, got: {headers}");
}

/// S2 Cold allow path: a fresh tunnel resolves via DoH, dials the returned
/// answer, and — once bytes have flowed — the address cache reflects the
/// real write-through from `dial_remote`.
#[tokio::test]
async fn s2_cold_path_drives_real_tunnel_and_caches_resolved_address() {
    let origin = spawn_fake_origin("www.pixiv.net").await;
    let mock_server = MockServer::start().await;
    mount_a_record(&mock_server, origin.addr.ip()).await;

    let mut trusted = RootCertStore::empty();
    trusted.add(origin.ca_cert_der.clone()).unwrap();
    let shared = test_shared(&doh_uri(&mock_server), unused_listen_addr(), trusted).await;

    assert!(shared.addr_cache.lookup("www.pixiv.net").is_none());

    let tunnel = spawn_tunnel(shared.clone(), "www.pixiv.net", origin.addr.port());
    let mut client_tls = client_tls_over_duplex(tunnel.client_end, &shared.ca.cert_der, "www.pixiv.net")
        .await
        .unwrap();

    let mut buf = [0u8; 2];
    client_tls.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");

    drop(client_tls);
    tunnel.task.await.unwrap();

    assert_eq!(shared.addr_cache.lookup("www.pixiv.net"), Some(origin.addr.ip()));
}

/// S3 Warm cache: a pre-seeded cache entry reaches the same origin without
/// any DoH query.
#[tokio::test]
async fn s3_warm_cache_skips_doh_and_reaches_cached_address() {
    let origin = spawn_fake_origin("www.pixiv.net").await;
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut trusted = RootCertStore::empty();
    trusted.add(origin.ca_cert_der.clone()).unwrap();
    let shared = test_shared(&doh_uri(&mock_server), unused_listen_addr(), trusted).await;
    shared.addr_cache.store("www.pixiv.net", origin.addr.ip());

    let tunnel = spawn_tunnel(shared.clone(), "www.pixiv.net", origin.addr.port());
    let mut client_tls = client_tls_over_duplex(tunnel.client_end, &shared.ca.cert_der, "www.pixiv.net")
        .await
        .unwrap();

    let mut buf = [0u8; 2];
    client_tls.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok");

    drop(client_tls);
    tunnel.task.await.unwrap();
}

/// S4 SAN fallback: upstream presents a cert valid for `i.pximg.net` while
/// the tunnel is for `pixiv.pximg.net`; the allow-list fallback accepts and
/// the tunnel completes normally.
#[tokio::test]
async fn s4_san_fallback_accepts_real_tunnel() {
    let origin = spawn_fake_origin("i.pximg.net").await;
    let mock_server = MockServer::start().await;
    mount_a_record(&mock_server, origin.addr.ip()).await;

    let mut trusted = RootCertStore::empty();
    trusted.add(origin.ca_cert_der.clone()).unwrap();
    let shared = test_shared(&doh_uri(&mock_server), unused_listen_addr(), trusted).await;

    let tunnel = spawn_tunnel(shared.clone(), "pixiv.pximg.net", origin.addr.port());
    let mut client_tls = client_tls_over_duplex(tunnel.client_end, &shared.ca.cert_der, "pixiv.pximg.net")
        .await
        .unwrap();

    let mut buf = [0u8; 2];
    client_tls.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ok", "SAN fallback should let the tunnel complete despite the SNI/leaf-SAN mismatch");

    drop(client_tls);
    tunnel.task.await.unwrap();
}

/// S5 Hard reject: an untrusted upstream chain is rejected even against the
/// allow-list fallback. The client-facing handshake (which only needs to
/// trust the proxy's own CA) still succeeds; the tunnel then closes without
/// leaving a cache entry behind.
#[tokio::test]
async fn s5_hard_reject_untrusted_chain_closes_without_caching() {
    let origin = spawn_fake_origin("i.pximg.net").await;
    let mock_server = MockServer::start().await;
    mount_a_record(&mock_server, origin.addr.ip()).await;

    // Deliberately empty: the origin's CA is never trusted here.
    let shared = test_shared(&doh_uri(&mock_server), unused_listen_addr(), RootCertStore::empty()).await;

    let tunnel = spawn_tunnel(shared.clone(), "i.pximg.net", origin.addr.port());
    let mut client_tls = client_tls_over_duplex(tunnel.client_end, &shared.ca.cert_der, "i.pximg.net")
        .await
        .unwrap();

    let mut buf = [0u8; 16];
    match tokio::time::timeout(Duration::from_secs(2), client_tls.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        other => panic!("expected the tunnel to close after a rejected upstream chain, got {other:?}"),
    }

    tunnel.task.await.unwrap();
    assert!(
        shared.addr_cache.lookup("i.pximg.net").is_none(),
        "a rejected upstream chain must not leave a cache entry behind"
    );
}

/// S6 Idle stall: client and remote are both silent after the handshake.
/// The pump's shared idle timer ends the whole tunnel within a bounded
/// extra interval instead of leaking a half-closed task forever — the exact
/// case a client-side-only timeout used to miss (invariant 7).
#[tokio::test(start_paused = true)]
async fn s6_idle_stall_on_both_sides_closes_within_bounded_interval() {
    let origin = spawn_silent_origin("www.pixiv.net").await;
    let mock_server = MockServer::start().await;
    mount_a_record(&mock_server, origin.addr.ip()).await;

    let mut trusted = RootCertStore::empty();
    trusted.add(origin.ca_cert_der.clone()).unwrap();
    let shared = test_shared(&doh_uri(&mock_server), unused_listen_addr(), trusted).await;

    let tunnel = spawn_tunnel(shared.clone(), "www.pixiv.net", origin.addr.port());
    let _client_tls = client_tls_over_duplex(tunnel.client_end, &shared.ca.cert_der, "www.pixiv.net")
        .await
        .unwrap();
    // Neither side writes anything further from here: both legs stall.

    tokio::time::advance(Duration::from_secs(6)).await;
    tunnel.task.await.unwrap();
}

// --- shared fixtures -------------------------------------------------

struct FakeOrigin {
    addr: SocketAddr,
    ca_cert_der: rcgen::CertificateDer<'static>,
}

/// Spawns a loopback TLS "origin" presenting a leaf cert for `san`. When
/// `write_greeting` is set it writes `b"ok"` immediately on accept (S2-S5,
/// which need to observe bytes flow); otherwise it accepts and then reads
/// in a loop without ever writing, staying open and silent (S6).
async fn spawn_origin(san: &str, write_greeting: bool) -> FakeOrigin {
    ensure_crypto_provider();
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::new()).unwrap();
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();
    let ca_cert_der = ca_cert.der().clone();

    let leaf_key = KeyPair::generate().unwrap();
    let leaf_params = CertificateParams::new(vec![san.to_string()]).unwrap();
    let issuer = Issuer::new(CertificateParams::from_ca_cert_der(&ca_cert_der).unwrap(), &ca_key);
    let leaf_cert = leaf_params.signed_by(&leaf_key, &issuer).unwrap();

    let key_der = rustls::pki_types::PrivateKeyDer::try_from(leaf_key.serialize_der()).unwrap();
    let server_config = Arc::new(
        rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![leaf_cert.der().clone()], key_der)
            .unwrap(),
    );
    let acceptor = TlsAcceptor::from(server_config);

    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { break };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(stream).await else { return };
                if write_greeting {
                    let _ = tls.write_all(b"ok").await;
                } else {
                    let mut sink = [0u8; 64];
                    loop {
                        match tls.read(&mut sink).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {}
                        }
                    }
                }
            });
        }
    });

    FakeOrigin { addr, ca_cert_der }
}

async fn spawn_fake_origin(san: &str) -> FakeOrigin {
    spawn_origin(san, true).await
}

async fn spawn_silent_origin(san: &str) -> FakeOrigin {
    spawn_origin(san, false).await
}

async fn mount_a_record(mock_server: &MockServer, ip: IpAddr) {
    Mock::given(method("GET"))
        .and(path("/dns-query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "Status": 0,
            "Answer": [{"type": 1, "TTL": 300, "data": ip.to_string()}],
        })))
        .mount(mock_server)
        .await;
}

fn doh_uri(mock_server: &MockServer) -> String {
    format!("{}/dns-query", mock_server.uri())
}

fn unused_listen_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

static CA_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn fresh_ca_dir() -> std::path::PathBuf {
    let n = CA_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("bypassd-scenario-ca-{}-{n}", std::process::id()))
}

/// Builds a `ProxyShared` exactly like `main` does, except `root_store` is
/// the caller's test trust store instead of the native OS roots — the
/// fake origins in this file are never signed by anything the OS trusts.
async fn test_shared(doh_endpoint: &str, listen_addr: SocketAddr, trusted_roots: RootCertStore) -> Arc<ProxyShared> {
    ensure_crypto_provider();
    let ca = bypassd_proxy::ca::load_or_generate(&fresh_ca_dir()).unwrap();
    let (drain_watcher, _drain_trigger) = bypassd_core::drain::new();
    let config = Arc::new(bypassd_proxy::AppConfig {
        listen_addr,
        doh_endpoint: doh_endpoint.to_string(),
        ..bypassd_proxy::AppConfig::default()
    });
    let doh = bypassd_proxy::doh::DohClient::new(config.doh_endpoint.clone()).unwrap();
    Arc::new(ProxyShared {
        config,
        allow_list: bypassd_proxy::allowlist::AllowList::defaults(),
        addr_cache: bypassd_proxy::addrcache::AddressCache::new(),
        cert_cache: bypassd_proxy::certcache::CertCache::new(),
        doh,
        ca,
        root_store: Arc::new(trusted_roots),
        drain: drain_watcher,
    })
}

struct Tunnel {
    client_end: tokio::io::DuplexStream,
    task: tokio::task::JoinHandle<()>,
}

/// Spawns `session::run_tunnel` against a `tokio::io::duplex` standing in
/// for the hijacked client connection, returning the test's end of that
/// duplex plus the tunnel's join handle.
fn spawn_tunnel(shared: Arc<ProxyShared>, host: &str, port: u16) -> Tunnel {
    let (client_side, client_end) = tokio::io::duplex(4096);
    let host = host.to_string();
    let task = tokio::spawn(async move {
        bypassd_proxy::session::run_tunnel(shared, host, port, client_side).await;
    });
    Tunnel { client_end, task }
}

async fn client_tls_over_duplex(
    end: tokio::io::DuplexStream,
    ca_cert_der: &rcgen::CertificateDer<'static>,
    sni: &str,
) -> std::io::Result<tokio_rustls::client::TlsStream<tokio::io::DuplexStream>> {
    let mut store = RootCertStore::empty();
    store.add(ca_cert_der.clone()).unwrap();
    let client_config = rustls::ClientConfig::builder().with_root_certificates(store).with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));
    let name = ServerName::try_from(sni.to_string()).unwrap();
    connector.connect(name, end).await
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

async fn wait_for_listener(addr: SocketAddr) {
    for _ in 0..50 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("frontend never started listening on {addr}");
}

async fn read_http_response_headers(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before response headers completed");
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}
