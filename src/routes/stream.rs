// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WebSocket endpoint streaming activities, routes and maps.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::models::SessionId;
use crate::routes::auth::SESSION_COOKIE;
use crate::sync::{Outbox, SyncSession};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/activities", get(activities_socket))
}

/// Upgrade to a WebSocket bound to the cookie's session (or a new one).
async fn activities_socket(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let session = match jar.get(SESSION_COOKIE).map(|c| SessionId::parse(c.value())) {
        Some(Ok(session)) => session,
        Some(Err(_)) | None => {
            let session = SessionId::generate();
            tracing::info!(session = %session, "Starting new session");
            session
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, session))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session: SessionId) {
    tracing::info!(session = %session, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut outgoing) = Outbox::channel();
    let strava = state.strava_for(&session, Arc::new(outbox.clone()));
    let sync = SyncSession::new(strava, outbox, state.shutdown.clone());

    let writer = tokio::spawn(async move {
        while let Some(message) = outgoing.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode server message");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            frame = receiver.next() => frame,
            _ = state.shutdown.triggered() => break,
        };
        match frame {
            Some(Ok(Message::Text(text))) => sync.dispatch(text.as_str()),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(session = %session, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    sync.close();
    writer.abort();
    tracing::info!(session = %session, "WebSocket disconnected");
}
