// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava OAuth callback.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use std::sync::Arc;

use crate::models::SessionId;
use crate::services::AuthOutcome;
use crate::AppState;

/// Cookie carrying the session token.
pub const SESSION_COOKIE: &str = "token";

/// Scope without which activities cannot be listed.
const REQUIRED_SCOPE: &str = "activity:read_all";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/token", get(token_callback))
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// OAuth callback - exchange the code, store tokens, wake the waiting requests.
async fn token_callback(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let session = match params.state.as_deref().map(SessionId::parse) {
        Some(Ok(session)) if state.pending.is_pending(&session) => session,
        _ => {
            tracing::warn!(state = ?params.state, "OAuth callback for unknown or expired login");
            return failure_page("This login link has expired. Go back to the map and try again.");
        }
    };

    if let Some(error) = params.error {
        tracing::warn!(session = %session, error = %error, "OAuth error from Strava");
        state
            .pending
            .resolve(&session, AuthOutcome::Denied(error));
        return failure_page("Strava access was not granted.");
    }

    let Some(code) = params.code else {
        state
            .pending
            .resolve(&session, AuthOutcome::Denied("missing code".to_string()));
        return failure_page("Strava did not send an authorization code.");
    };

    if !has_scope(params.scope.as_deref(), REQUIRED_SCOPE) {
        tracing::warn!(session = %session, scope = ?params.scope, "Insufficient OAuth scope");
        state
            .pending
            .resolve(&session, AuthOutcome::Denied("insufficient scope".to_string()));
        return failure_page("Access to all activities is needed to draw the heatmap.");
    }

    tracing::info!(session = %session, "Exchanging authorization code for tokens");
    if let Err(e) = state.auth.exchange_code(&session, &code).await {
        if e.is_fatal() {
            state.shutdown.trigger(&e.to_string());
        }
        tracing::error!(session = %session, error = %e, "Code exchange failed");
        state
            .pending
            .resolve(&session, AuthOutcome::Denied(e.to_string()));
        return failure_page("Logging in with Strava failed.");
    }

    state.pending.resolve(&session, AuthOutcome::Authorized);

    let cookie = Cookie::build((SESSION_COOKIE, session.to_string()))
        .max_age(time::Duration::days(365))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(state.config.secure_cookies());

    (
        jar.add(cookie),
        Html(page("Logged in", "Logged in with Strava. You can close this tab.")),
    )
        .into_response()
}

/// Strava reports granted scopes as a comma-separated list.
fn has_scope(granted: Option<&str>, wanted: &str) -> bool {
    granted.is_some_and(|scopes| scopes.split(',').any(|scope| scope.trim() == wanted))
}

fn failure_page(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Html(page("Login failed", message))).into_response()
}

fn page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>\n"
    )
}
