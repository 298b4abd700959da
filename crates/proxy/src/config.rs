//! Immutable, process-wide configuration, parsed once and threaded through
//! as `Arc<AppConfig>` exactly as the teacher threads `Arc<Config>`.

use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub doh_endpoint: String,
    pub management_addr: SocketAddr,
    pub ca_dir: PathBuf,
    pub verbosity: u8,
    pub open_browser: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            listen_addr: "127.0.0.1:8080".parse().unwrap(),
            doh_endpoint: "https://1.0.0.1/dns-query".to_string(),
            management_addr: "127.0.0.1:8081".parse().unwrap(),
            ca_dir: crate::ca::default_ca_dir(),
            verbosity: 0,
            open_browser: true,
        }
    }
}
