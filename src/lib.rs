// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Strava heatmapper: stream an athlete's activities and routes to a map
//!
//! The browser opens a WebSocket, asks for time windows of activities,
//! the athlete's routes and detailed polylines, and receives results as
//! they arrive from Strava. Strava credentials are kept per browser
//! session on disk.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use config::Config;
use db::SessionStore;
use models::SessionId;
use services::{LoginPrompt, PendingAuthorizations, StravaAuth, StravaClient, StravaService};
use shutdown::Shutdown;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub auth: StravaAuth,
    pub pending: Arc<PendingAuthorizations>,
    pub shutdown: Shutdown,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sessions = SessionStore::new(config.sessions_dir.clone(), config.session_lock_retries);
        let auth = StravaAuth::new(
            StravaClient::from_config(&config),
            sessions,
            config.callback_url(),
        );
        Self {
            config,
            auth,
            pending: Arc::new(PendingAuthorizations::new()),
            shutdown: Shutdown::new(),
        }
    }

    /// Shorten how long login prompts wait (for tests).
    pub fn with_authorization_timeout(mut self, timeout: Duration) -> Self {
        self.pending = Arc::new(PendingAuthorizations::with_timeout(timeout));
        self
    }

    /// Strava access for one connection, prompting through `prompt`.
    pub fn strava_for(&self, session: &SessionId, prompt: Arc<dyn LoginPrompt>) -> StravaService {
        StravaService::new(
            self.auth.clone(),
            Arc::clone(&self.pending),
            session.clone(),
            prompt,
        )
    }
}
