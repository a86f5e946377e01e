//! Call-scoped cooperative cancellation.
//!
//! A [`CancelToken`] is a `watch` channel carrying a single "cancelled" bit.
//! Child tokens also observe every ancestor, so cancelling a call cancels the
//! reconnect loops that the call's clients derived from it, while a client
//! can still cancel its own children without ending the call.

use futures_util::future::select_all;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    /// Own receiver first, then one per ancestor.
    watched: Vec<watch::Receiver<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            watched: vec![rx],
        }
    }

    /// Creates a token cancelled when either it or `self` is cancelled.
    pub fn child(&self) -> Self {
        let (tx, rx) = watch::channel(false);
        let mut watched = Vec::with_capacity(self.watched.len() + 1);
        watched.push(rx);
        watched.extend(self.watched.iter().cloned());
        Self {
            tx: Arc::new(tx),
            watched,
        }
    }

    /// Cancels this token and all of its children. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` once this token or any ancestor is cancelled.
    ///
    /// An ancestor whose every handle has been dropped counts as cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.watched
            .iter()
            .any(|rx| *rx.borrow() || rx.has_changed().is_err())
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let waits = self.watched.iter().map(|rx| {
            let mut rx = rx.clone();
            Box::pin(async move {
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            })
        });
        select_all(waits).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
