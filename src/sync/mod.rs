// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Streaming sync of activities, routes and maps over a WebSocket.

pub mod outbox;
pub mod protocol;
pub mod session;

pub use outbox::Outbox;
pub use protocol::{ClientMessage, FindingStats, RequestKind, ServerMessage};
pub use session::SyncSession;
