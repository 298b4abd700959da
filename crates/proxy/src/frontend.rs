//! Accepts HTTP/1.1 CONNECT requests and dispatches per [`Classification`].
//!
//! Grounded on the teacher's `hyper`/`hyper-util` dependency pair: a
//! `hyper::server::conn::http1` listener over a `tokio::net::TcpListener`,
//! using `hyper::upgrade::on` to obtain the raw duplex stream once a CONNECT
//! has been answered with `200 Connection Established` — the standard idiom
//! for CONNECT proxies on `hyper` 1.x.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use crate::allowlist::Classification;
use crate::error::TunnelError;
use crate::shared::ProxyShared;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub async fn serve(shared: Arc<ProxyShared>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(shared.config.listen_addr)
        .await
        .map_err(|source| crate::error::BootstrapError::Listen {
            addr: shared.config.listen_addr,
            source,
        })?;
    tracing::info!(addr = %shared.config.listen_addr, "proxy frontend listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed, continuing");
                continue;
            }
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| handle(shared.clone(), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).with_upgrades().await {
                tracing::debug!(%peer, error = %e, "connection closed with error");
            }
        });
    }
}

async fn handle(shared: Arc<ProxyShared>, req: Request<Incoming>) -> Result<Response<BoxBody>, Infallible> {
    if req.method() != hyper::Method::CONNECT {
        return Ok(forward_default(shared, req).await);
    }

    let Some(authority) = req.uri().authority().cloned() else {
        return Ok(bad_request("CONNECT target must be host:port"));
    };
    let host = authority.host().to_string();
    let port = authority.port_u16().unwrap_or(443);
    let host_port = format!("{host}:{port}");

    match shared.allow_list.classify(&host_port) {
        Classification::Blackhole => {
            let blocked = TunnelError::Blocked(host_port.clone());
            tracing::debug!(host = %host_port, error = %blocked, "rejecting CONNECT");
            Ok(reject(StatusCode::FORBIDDEN))
        }
        Classification::Allow => {
            let drain_guard = shared.drain.clone();
            tokio::spawn(async move {
                let _drain_guard = drain_guard;
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        crate::session::run_tunnel(shared, host, port, TokioIo::new(upgraded)).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "upgrade failed"),
                }
            });
            Ok(connection_established())
        }
        Classification::Default => {
            let drain_guard = shared.drain.clone();
            tokio::spawn(async move {
                let _drain_guard = drain_guard;
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        passthrough(TokioIo::new(upgraded), &host, port).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "upgrade failed"),
                }
            });
            Ok(connection_established())
        }
    }
}

async fn passthrough(client: TokioIo<hyper::upgrade::Upgraded>, host: &str, port: u16) {
    let target = match TcpStream::connect((host, port)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!(host, port, error = %e, "passthrough dial failed");
            return;
        }
    };
    let mut client = client;
    let mut target = target;
    let _ = tokio::io::copy_bidirectional(&mut client, &mut target).await;
}

async fn forward_default(_shared: Arc<ProxyShared>, _req: Request<Incoming>) -> Response<BoxBody> {
    bad_request("only CONNECT is supported on this listener")
}

fn connection_established() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .unwrap()
}

fn reject(status: StatusCode) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .unwrap()
}

fn bad_request(msg: &'static str) -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Full::new(Bytes::from_static(msg.as_bytes())).map_err(|never| match never {}).boxed())
        .unwrap()
}
