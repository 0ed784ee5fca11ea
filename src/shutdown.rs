// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Process-wide fatal shutdown signal.

use std::sync::Arc;
use tokio::sync::watch;

/// Raised when the server can no longer operate correctly (the Strava
/// token endpoint rejected our client). `main` drains connections and
/// exits with an error once it fires.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self, reason: &str) {
        if !self.tx.send_replace(true) {
            tracing::error!(reason, "Fatal error, shutting down");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so this only returns once the flag is set.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}
