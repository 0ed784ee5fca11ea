// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::Router;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use strava_heatmapper::config::Config;
use strava_heatmapper::models::SessionId;
use strava_heatmapper::routes::create_router;
use strava_heatmapper::sync::{Outbox, ServerMessage, SyncSession};
use strava_heatmapper::AppState;
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const ATHLETE_ID: u64 = 42;

/// App wired to a wiremock Strava and a temporary sessions directory.
#[allow(dead_code)]
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub strava: MockServer,
    pub sessions: TempDir,
}

#[allow(dead_code)]
pub fn test_config(strava: &MockServer, sessions: &TempDir) -> Config {
    Config {
        sessions_dir: sessions.path().to_path_buf(),
        strava_api_url: format!("{}/api/v3", strava.uri()),
        strava_oauth_url: format!("{}/oauth", strava.uri()),
        ..Config::default()
    }
}

/// Create a test app. Login prompts time out after a few seconds.
#[allow(dead_code)]
pub async fn create_test_app() -> TestApp {
    let strava = MockServer::start().await;
    let sessions = tempfile::tempdir().expect("tempdir");
    let state = Arc::new(
        AppState::new(test_config(&strava, &sessions))
            .with_authorization_timeout(Duration::from_secs(5)),
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        strava,
        sessions,
    }
}

/// Store a valid access token and known athlete for `session`.
#[allow(dead_code)]
pub async fn authorize_session(state: &AppState, session: &SessionId, access_token: &str) {
    let access_token = access_token.to_string();
    state
        .auth
        .sessions()
        .update(session, move |c| {
            c.strava_access_token = Some(access_token);
            c.strava_refresh_token = Some("refresh-0".to_string());
            c.strava_expiry = Some(Utc::now().timestamp() + 1800);
            c.learn_athlete(ATHLETE_ID);
        })
        .await
        .expect("store credential");
}

/// Mount a successful token exchange/refresh returning `access_token`.
#[allow(dead_code)]
pub async fn mock_token_endpoint(strava: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token_type": "Bearer",
            "access_token": access_token,
            "refresh_token": "refresh-1",
            "expires_at": Utc::now().timestamp() + 6 * 3600,
            "expires_in": 6 * 3600,
            "athlete": {"id": ATHLETE_ID}
        })))
        .mount(strava)
        .await;
}

/// A connection's sync session plus the messages it emits.
#[allow(dead_code)]
pub struct TestConnection {
    pub sync: Arc<SyncSession>,
    pub messages: mpsc::UnboundedReceiver<ServerMessage>,
}

#[allow(dead_code)]
impl TestConnection {
    pub fn open(state: &AppState, session: &SessionId) -> Self {
        let (outbox, messages) = Outbox::channel();
        let strava = state.strava_for(session, Arc::new(outbox.clone()));
        Self {
            sync: SyncSession::new(strava, outbox, state.shutdown.clone()),
            messages,
        }
    }

    /// Next message, failing the test if none arrives within two seconds.
    pub async fn next(&mut self) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), self.messages.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("outbox closed")
    }

    /// Collect messages up to and including the first `finished` stats.
    pub async fn until_finished(&mut self) -> Vec<ServerMessage> {
        let mut seen = Vec::new();
        loop {
            let message = self.next().await;
            let done = matches!(&message, ServerMessage::Stats { finding } if finding.finished);
            seen.push(message);
            if done {
                return seen;
            }
        }
    }
}

/// JSON for one summary activity as returned by the list endpoint.
#[allow(dead_code)]
pub fn activity_json(id: u64, polyline: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("Activity {}", id),
        "start_date_local": "2024-03-01T08:00:00Z",
        "type": "Ride",
        "map": {"id": format!("a{}", id), "summary_polyline": polyline}
    })
}
