// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types.

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No usable Strava credential, even after the login flow ran.
    #[error("Strava authorization required")]
    NeedsAuthorization,

    #[error("Invalid session token")]
    InvalidSession,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Strava API error: {0}")]
    StravaApi(String),

    /// The OAuth token endpoint rejected a code or refresh token.
    #[error("Strava token endpoint error: {0}")]
    TokenEndpoint(String),

    #[error("Could not lock session file: {0}")]
    LockAcquisition(String),

    #[error("Session store error: {0}")]
    SessionStore(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub const STRAVA_RATE_LIMIT: &'static str = "Rate limit exceeded";

    /// Errors after which the OAuth client state can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::TokenEndpoint(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;
