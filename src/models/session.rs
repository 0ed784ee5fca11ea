// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Session identity and the Strava credential persisted per session.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Access tokens this close to expiry are treated as already expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Opaque, unguessable session token (a random UUID).
///
/// Only ever constructed from a freshly generated UUID or a validated one,
/// so it is always safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Validate a token supplied by a client (cookie or OAuth `state`).
    pub fn parse(raw: &str) -> Result<Self> {
        let id = Uuid::try_parse(raw).map_err(|_| AppError::InvalidSession)?;
        if id.get_version() != Some(uuid::Version::Random) {
            return Err(AppError::InvalidSession);
        }
        Ok(Self(id.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strava credential for one session, as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_refresh_token: Option<String>,
    /// Strava athlete ID, fixed once learned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_athlete: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_access_token: Option<String>,
    /// When the access token stops being used (Unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strava_expiry: Option<i64>,
}

/// Where a session is in the credential lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    NoCredential,
    HasRefreshToken,
    HasAccessToken,
}

impl Credential {
    pub fn state(&self, now: DateTime<Utc>) -> CredentialState {
        if self.valid_access_token(now).is_some() {
            CredentialState::HasAccessToken
        } else if self.strava_refresh_token.is_some() {
            CredentialState::HasRefreshToken
        } else {
            CredentialState::NoCredential
        }
    }

    /// The access token, if present and not about to expire.
    pub fn valid_access_token(&self, now: DateTime<Utc>) -> Option<&str> {
        let expiry = DateTime::from_timestamp(self.strava_expiry?, 0)?;
        if now + Duration::seconds(EXPIRY_MARGIN_SECS) >= expiry {
            return None;
        }
        self.strava_access_token.as_deref()
    }

    pub fn clear_access_token(&mut self) {
        self.strava_access_token = None;
        self.strava_expiry = None;
    }

    /// Record the athlete ID unless one is already known.
    pub fn learn_athlete(&mut self, athlete_id: u64) {
        if self.strava_athlete.is_none() {
            self.strava_athlete = Some(athlete_id);
        }
    }
}
