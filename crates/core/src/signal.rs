//! Process-level shutdown signaling.
//!
//! A small wrapper around a `tokio::sync::watch` channel: `ShutdownTrigger`
//! is cloned into anything that should be able to request shutdown (e.g. the
//! management server's `/quitquitquit`-equivalent), `ShutdownRx` is awaited
//! by the listener loop.

use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct ShutdownRx {
    rx: watch::Receiver<bool>,
}

pub fn new() -> (ShutdownTrigger, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownRx { rx })
}

impl ShutdownTrigger {
    /// Request shutdown; idempotent.
    pub fn shutdown_now(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownRx {
    /// Resolves once shutdown has been requested.
    pub async fn recv(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

/// Waits for either Ctrl+C or an explicit shutdown request.
pub async fn wait_for_shutdown(mut rx: ShutdownRx) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = rx.recv() => {},
    }
}
