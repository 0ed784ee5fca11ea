// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Outgoing message queue for one WebSocket connection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::SessionId;
use crate::services::strava::LoginPrompt;
use crate::sync::protocol::ServerMessage;

/// Sending half of a connection. Cheap to clone; sends after
/// [`Outbox::close`] are dropped silently.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ServerMessage>,
    live: Arc<AtomicBool>,
    /// Highest authorization prompt already announced to this client
    announced: Arc<AtomicU64>,
}

impl Outbox {
    /// Create an outbox and the receiver the connection's writer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = Self {
            tx,
            live: Arc::new(AtomicBool::new(true)),
            announced: Arc::new(AtomicU64::new(0)),
        };
        (outbox, rx)
    }

    /// Queue a message. Returns false if the connection is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        if !self.is_live() {
            return false;
        }
        self.tx.send(message).is_ok()
    }

    pub fn close(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

impl LoginPrompt for Outbox {
    fn request_login(&self, pending: u64, session: &SessionId, url: &str) {
        // Several requests may wait on the same prompt; tell the user once.
        if self.announced.fetch_max(pending, Ordering::SeqCst) >= pending {
            return;
        }
        tracing::info!(session = %session, pending, "Asking client to log in");
        self.send(ServerMessage::Login {
            cookie: session.to_string(),
            url: url.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_sends_after_close() {
        let (outbox, mut rx) = Outbox::channel();
        assert!(outbox.send(ServerMessage::Routes { routes: vec![] }));
        outbox.close();
        assert!(!outbox.send(ServerMessage::Routes { routes: vec![] }));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_login_prompt_announced_once() {
        let (outbox, mut rx) = Outbox::channel();
        let session = SessionId::generate();

        outbox.request_login(1, &session, "https://strava.example/authorize");
        outbox.request_login(1, &session, "https://strava.example/authorize");

        match rx.try_recv().unwrap() {
            ServerMessage::Login { cookie, url } => {
                assert_eq!(cookie, session.to_string());
                assert_eq!(url, "https://strava.example/authorize");
            }
            other => panic!("expected login, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());

        // A new prompt (after a timeout) is announced again.
        outbox.request_login(2, &session, "https://strava.example/authorize");
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Login { .. })));
    }

    #[test]
    fn test_dropped_receiver_is_not_live() {
        let (outbox, rx) = Outbox::channel();
        drop(rx);
        assert!(!outbox.is_live());
    }
}
