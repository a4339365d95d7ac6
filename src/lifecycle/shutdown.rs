//! Relay-wide stop signal.
//!
//! The relay server, the admin endpoint and the config watcher all stop on
//! the same trigger. Triggering twice is harmless; the first reason wins.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Resolves once shutdown is triggered, immediately if it already was.
    /// Suitable for `with_graceful_shutdown`.
    pub fn signalled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        let already = self.is_triggered();
        async move {
            if !already {
                let _ = rx.recv().await;
            }
        }
    }

    /// Start shutting down. Returns false when shutdown was already under way.
    pub fn trigger(&self, reason: &str) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            tracing::debug!(reason = %reason, "Shutdown already in progress");
            return false;
        }
        tracing::info!(reason = %reason, listeners = self.tx.receiver_count(), "Shutting down");
        let _ = self.tx.send(());
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
