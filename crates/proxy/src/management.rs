//! Diagnostic dashboard, `/dns` probe, and `/logging` runtime level control.
//!
//! Grounded on `management/admin.rs`'s `Service`/dashboard/`/logging` trio,
//! trimmed to what this system needs: no PAT, JWT, pprof, or config-dump —
//! those are teacher-specific surfaces with no counterpart here.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::shared::ProxyShared;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

const HELP_STRING: &str = "usage: POST /logging\t\t\t\t(to list the current level)\n\
usage: POST /logging?level=<level>\t\t(to change the global level)\n\
usage: POST /logging?reset\t\t\t(to restore the startup default)\n";

pub async fn serve(shared: Arc<ProxyShared>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(shared.config.management_addr)
        .await
        .map_err(|source| crate::error::BootstrapError::Listen {
            addr: shared.config.management_addr,
            source,
        })?;
    tracing::info!(addr = %shared.config.management_addr, "management server listening");

    loop {
        let (stream, _peer) = listener.accept().await?;
        let shared = shared.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| handle(shared.clone(), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::debug!(error = %e, "management connection closed with error");
            }
        });
    }
}

async fn handle(shared: Arc<ProxyShared>, req: Request<Incoming>) -> Result<Response<BoxBody>, std::convert::Infallible> {
    let response = match req.uri().path() {
        "/" => handle_dashboard(&shared),
        "/dns" => handle_dns(&shared, &req).await,
        "/logging" => handle_logging(req).await,
        _ => plaintext(StatusCode::NOT_FOUND, "not found\n".to_string()),
    };
    Ok(response)
}

fn handle_dashboard(shared: &ProxyShared) -> Response<BoxBody> {
    let body = format!(
        "<html><body><h1>bypassd</h1>\
         <p>{build_info}</p>\
         <p>proxy listening on {listen}</p>\
         <ul>\
         <li><a href=\"/dns?name=www.pixiv.net\">/dns?name=&lt;host&gt;</a> — run a DoH A-record probe</li>\
         <li><a href=\"/logging\">/logging</a> — query or change the runtime log level</li>\
         </ul></body></html>",
        build_info = bypassd_core::version::BUILD_INFO,
        listen = shared.config.listen_addr,
    );
    html(StatusCode::OK, body)
}

async fn handle_dns(shared: &ProxyShared, req: &Request<Incoming>) -> Response<BoxBody> {
    let qp = query_params(req);
    let Some(name) = qp.get("name") else {
        return plaintext(StatusCode::BAD_REQUEST, "usage: /dns?name=<host>\n".to_string());
    };

    match shared.doh.resolve_a(name).await {
        Ok(answers) => {
            let body = serde_json::json!({
                "name": name,
                "answers": answers.iter().map(|a| serde_json::json!({"data": a.data, "ttl": a.ttl})).collect::<Vec<_>>(),
            });
            json(StatusCode::OK, body.to_string())
        }
        Err(e) => json(StatusCode::BAD_GATEWAY, serde_json::json!({"error": e.to_string()}).to_string()),
    }
}

async fn handle_logging(req: Request<Incoming>) -> Response<BoxBody> {
    if req.method() != hyper::Method::POST && req.method() != hyper::Method::GET {
        return plaintext(StatusCode::METHOD_NOT_ALLOWED, format!("invalid method\n{HELP_STRING}"));
    }

    let qp = query_params(&req);
    let level = qp.get("level").cloned();
    let reset = qp.contains_key("reset");

    if level.is_some() || reset {
        change_log_level(reset, level.as_deref().unwrap_or(""))
    } else {
        list_current_level()
    }
}

fn list_current_level() -> Response<BoxBody> {
    match bypassd_core::telemetry::get_current_loglevel() {
        Ok(level) => plaintext(StatusCode::OK, format!("current log level is {level}\n")),
        Err(e) => plaintext(StatusCode::INTERNAL_SERVER_ERROR, format!("failed to read log level: {e}\n{HELP_STRING}")),
    }
}

fn change_log_level(reset: bool, level: &str) -> Response<BoxBody> {
    if !reset && level.is_empty() {
        return list_current_level();
    }
    match bypassd_core::telemetry::set_level(reset, level) {
        Ok(()) => list_current_level(),
        Err(e) => plaintext(StatusCode::BAD_REQUEST, format!("failed to set level: {e}\n{HELP_STRING}")),
    }
}

fn query_params(req: &Request<Incoming>) -> HashMap<String, String> {
    req.uri()
        .query()
        .map(|v| url::form_urlencoded::parse(v.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn plaintext(status: StatusCode, body: String) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .unwrap()
}

fn html(status: StatusCode, body: String) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .unwrap()
}

fn json(status: StatusCode, body: String) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)).map_err(|never| match never {}).boxed())
        .unwrap()
}
