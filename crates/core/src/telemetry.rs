//! Logging setup and runtime log-level control.
//!
//! Mirrors the teacher's `/logging` admin endpoint contract: a single
//! reloadable `EnvFilter` that can be queried and replaced at runtime.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

type ReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static FILTER_HANDLE: OnceLock<ReloadHandle> = OnceLock::new();

/// Initialize the global tracing subscriber.
///
/// `verbosity` is the `-v` flag count: 0 = "info", 1 = "debug", 2+ = "trace"
/// for this crate's own targets, with everything else left at "warn"
/// unless overridden by `RUST_LOG`.
pub fn init(verbosity: u8) {
    let default_directive = match verbosity {
        0 => "info",
        1 => "bypassd=debug,info",
        _ => "bypassd=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let _ = FILTER_HANDLE.set(handle);
}

/// Return the current filter directive string, for the `/logging` endpoint.
pub fn get_current_loglevel() -> anyhow::Result<String> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| anyhow::anyhow!("telemetry not initialized"))?;
    handle
        .with_current(|f| f.to_string())
        .map_err(|e| anyhow::anyhow!("failed to read current filter: {e}"))
}

/// Replace the current filter, for the `/logging` endpoint.
/// `reset` restores the process-startup default; otherwise `level` is
/// parsed as an `EnvFilter` directive string.
pub fn set_level(reset: bool, level: &str) -> anyhow::Result<()> {
    let handle = FILTER_HANDLE
        .get()
        .ok_or_else(|| anyhow::anyhow!("telemetry not initialized"))?;
    let new_filter = if reset {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_new(level).map_err(|e| anyhow::anyhow!("invalid filter: {e}"))?
    };
    handle
        .reload(new_filter)
        .map_err(|e| anyhow::anyhow!("failed to reload filter: {e}"))
}
