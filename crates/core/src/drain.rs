//! Graceful connection draining.
//!
//! Each accepted connection holds a `DrainWatcher` clone for its lifetime.
//! When shutdown is requested, `DrainTrigger::drain()` waits until every
//! outstanding clone has been dropped before returning, so in-flight tunnels
//! get to finish instead of being cut mid-stream.

use tokio::sync::watch;

#[derive(Clone)]
pub struct DrainWatcher {
    _tx: watch::Sender<()>,
}

pub struct DrainTrigger {
    rx: watch::Receiver<()>,
}

pub fn new() -> (DrainWatcher, DrainTrigger) {
    let (tx, rx) = watch::channel(());
    (DrainWatcher { _tx: tx }, DrainTrigger { rx })
}

impl DrainTrigger {
    /// Waits until every `DrainWatcher` clone handed out by the paired
    /// `DrainWatcher` has been dropped.
    pub async fn drain(mut self) {
        let _ = self.rx.changed().await;
    }
}
