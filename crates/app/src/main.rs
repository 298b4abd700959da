//! CLI entry point: parses flags, bootstraps the CA, builds the shared
//! proxy state, and runs the frontend and management listeners side by
//! side until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bypassd_proxy::{AppConfig, ProxyShared};
use clap::Parser;

/// A locally-run HTTPS interception proxy that bypasses DNS-based blocking
/// of a fixed set of allow-listed hosts.
#[derive(Parser, Debug)]
#[command(name = "bypassd", version)]
struct Cli {
    /// Address the CONNECT-hijacking proxy listens on.
    #[arg(short = 'l', long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// DNS-over-HTTPS endpoint used for A-record resolution.
    #[arg(short = 'e', long, default_value = "https://1.0.0.1/dns-query")]
    doh_endpoint: String,

    /// Raise log verbosity; repeatable (-v, -vv).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Address the diagnostic management server listens on.
    #[arg(short = 'm', long, default_value = "127.0.0.1:8081")]
    management_addr: SocketAddr,

    /// Directory holding the process CA's certificate and private key.
    #[arg(long)]
    ca_dir: Option<PathBuf>,

    /// Open the management dashboard in the default browser on startup.
    #[arg(long, default_value_t = true, overrides_with = "no_open")]
    open: bool,

    /// Disable the startup browser launch.
    #[arg(long = "no-open", default_value_t = false, overrides_with = "open")]
    no_open: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    bypassd_core::telemetry::init(cli.verbose);
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = Arc::new(AppConfig {
        listen_addr: cli.listen,
        doh_endpoint: cli.doh_endpoint,
        management_addr: cli.management_addr,
        ca_dir: cli.ca_dir.unwrap_or_else(bypassd_proxy::ca::default_ca_dir),
        verbosity: cli.verbose,
        open_browser: cli.open && !cli.no_open,
    });

    let ca = bypassd_proxy::ca::load_or_generate(&config.ca_dir)?;
    let (drain_watcher, drain_trigger) = bypassd_core::drain::new();
    let shared = Arc::new(ProxyShared::new(config.clone(), ca, drain_watcher)?);

    let (shutdown_trigger, shutdown_rx) = bypassd_core::signal::new();

    if config.open_browser {
        let url = format!("http://{}", config.management_addr);
        if let Err(e) = webbrowser::open(&url) {
            tracing::debug!(error = %e, "failed to open browser, continuing");
        }
    }

    let frontend = tokio::spawn(bypassd_proxy::frontend::serve(shared.clone()));
    let management = tokio::spawn(bypassd_proxy::management::serve(shared.clone()));

    tokio::select! {
        result = frontend => {
            result??;
        }
        result = management => {
            result??;
        }
        _ = bypassd_core::signal::wait_for_shutdown(shutdown_rx) => {
            tracing::info!("shutdown requested");
        }
    }

    shutdown_trigger.shutdown_now();
    tracing::info!("waiting for in-flight tunnels to drain");
    drain_trigger.drain().await;
    Ok(())
}
