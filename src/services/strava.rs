// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client for listing activities and routes and fetching maps.
//!
//! Handles:
//! - Paginated activity and route listing
//! - Activity and route detail (full-resolution polylines)
//! - OAuth code exchange and token refresh
//! - Re-authorization when a call is unauthorized
//! - Rate limit detection

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{ActivityMap, ItemId, MappedSummary, SessionId, Summary, TimeRange};
use crate::services::auth::{AuthOutcome, PendingAuthorizations, StravaAuth, TokenLookup};
use crate::services::eager::PageSource;

/// Records per page for list endpoints (Strava's maximum).
pub const PAGE_SIZE: i64 = 200;

/// Scopes needed to list private activities and routes.
pub const OAUTH_SCOPES: &str = "read_all,activity:read_all";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    api_url: String,
    oauth_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: "https://www.strava.com/api/v3".to_string(),
            oauth_url: "https://www.strava.com/oauth".to_string(),
            client_id,
            client_secret,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.strava_client_id.clone(),
            config.strava_client_secret.clone(),
        )
        .with_base_urls(&config.strava_api_url, &config.strava_oauth_url)
    }

    /// Override the API and OAuth base URLs (for testing with wiremock).
    pub fn with_base_urls(mut self, api_url: &str, oauth_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self.oauth_url = oauth_url.trim_end_matches('/').to_string();
        self
    }

    /// URL the user visits to grant access; Strava redirects back with `state`.
    pub fn authorize_url(&self, redirect_uri: &str, state: &SessionId) -> String {
        format!(
            "{}/authorize?\
             client_id={}&\
             response_type=code&\
             redirect_uri={}&\
             approval_prompt=auto&\
             scope={}&\
             state={}",
            self.oauth_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            OAUTH_SCOPES,
            state
        )
    }

    /// GET an API path and parse the JSON body.
    ///
    /// A 401 becomes [`AppError::NeedsAuthorization`].
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        access_token: &str,
        path: &str,
        query: &[(&str, Option<i64>)],
    ) -> Result<T> {
        let url = format!("{}{}", self.api_url, path);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&build_query(query))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AppError::StravaApi(e.to_string()))?;

        self.check_response_json(response).await
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse> {
        self.token_request(&[("code", code), ("grant_type", "authorization_code")])
            .await
            .map_err(AppError::from)
    }

    /// Refresh an expired access token.
    ///
    /// A 400/401 means the refresh token is no longer valid and is reported
    /// as [`AppError::NeedsAuthorization`].
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        match self
            .token_request(&[
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .await
        {
            Err(TokenRequestError::Rejected(status, body))
                if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED =>
            {
                tracing::warn!(status = %status, body = %body, "Strava rejected refresh token");
                Err(AppError::NeedsAuthorization)
            }
            other => other.map_err(AppError::from),
        }
    }

    async fn token_request(
        &self,
        grant: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, TokenRequestError> {
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(grant);

        let response = self
            .http
            .post(format!("{}/token", self.oauth_url))
            .form(&form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| TokenRequestError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TokenRequestError::Rejected(status, body));
        }

        response
            .json()
            .await
            .map_err(|e| TokenRequestError::Transport(format!("Failed to parse token response: {}", e)))
    }

    /// Check response and parse JSON body.
    async fn check_response_json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status == StatusCode::TOO_MANY_REQUESTS {
                tracing::warn!("Strava rate limit hit (429)");
                return Err(AppError::StravaApi(AppError::STRAVA_RATE_LIMIT.to_string()));
            }

            if status == StatusCode::UNAUTHORIZED {
                return Err(AppError::NeedsAuthorization);
            }

            return Err(AppError::StravaApi(format!("HTTP {}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::StravaApi(format!("JSON parse error: {}", e)))
    }
}

/// Query pairs with absent and zero values dropped.
pub fn build_query<'a>(params: &[(&'a str, Option<i64>)]) -> Vec<(&'a str, String)> {
    params
        .iter()
        .filter_map(|(key, value)| match value {
            Some(v) if *v != 0 => Some((*key, v.to_string())),
            _ => None,
        })
        .collect()
}

enum TokenRequestError {
    Transport(String),
    Rejected(StatusCode, String),
}

impl From<TokenRequestError> for AppError {
    fn from(err: TokenRequestError) -> Self {
        match err {
            // Network trouble says nothing about the OAuth client state.
            TokenRequestError::Transport(msg) => {
                AppError::StravaApi(format!("Token request failed: {}", msg))
            }
            TokenRequestError::Rejected(status, body) => {
                AppError::TokenEndpoint(format!("HTTP {}: {}", status, body))
            }
        }
    }
}

/// Token response from Strava OAuth (athlete included on code exchange).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    #[serde(default)]
    pub athlete: Option<StravaAthlete>,
}

/// Athlete info from OAuth token exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaAthlete {
    pub id: u64,
}

/// Activity map data with polylines.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StravaMap {
    pub polyline: Option<String>,
    pub summary_polyline: Option<String>,
}

/// Summary activity from the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryActivity {
    pub id: u64,
    pub name: String,
    pub start_date_local: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub map: Option<StravaMap>,
}

impl SummaryActivity {
    /// Reduce to the client summary; `None` when there is no GPS trace.
    pub fn into_mapped(self) -> Option<MappedSummary> {
        let polyline = summary_polyline(self.map)?;
        let id = ItemId::Number(self.id);
        Some(MappedSummary {
            summary: Summary {
                route: false,
                id: id.clone(),
                name: self.name,
                date: self.start_date_local.timestamp_millis(),
                kind: self.kind,
                sub_type: None,
            },
            map: ActivityMap { id, polyline },
        })
    }
}

/// Summary route from the list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryRoute {
    pub id_str: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub kind: Option<u8>,
    #[serde(default)]
    pub sub_type: Option<u8>,
    #[serde(default)]
    pub map: Option<StravaMap>,
}

impl SummaryRoute {
    pub fn into_mapped(self) -> Option<MappedSummary> {
        let polyline = summary_polyline(self.map)?;
        let id = ItemId::Text(self.id_str);
        Some(MappedSummary {
            summary: Summary {
                route: true,
                id: id.clone(),
                name: self.name,
                date: self.created_at.timestamp_millis(),
                kind: self
                    .kind
                    .and_then(route_type_name)
                    .unwrap_or("Unknown")
                    .to_string(),
                sub_type: self.sub_type.and_then(route_sub_type_name).map(str::to_string),
            },
            map: ActivityMap { id, polyline },
        })
    }
}

fn summary_polyline(map: Option<StravaMap>) -> Option<String> {
    map?.summary_polyline.filter(|polyline| !polyline.is_empty())
}

fn route_type_name(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("Ride"),
        2 => Some("Run"),
        3 => Some("Walk"),
        _ => None,
    }
}

fn route_sub_type_name(code: u8) -> Option<&'static str> {
    match code {
        1 => Some("Road"),
        2 => Some("MountainBike"),
        3 => Some("Cross"),
        4 => Some("Trail"),
        5 => Some("Mixed"),
        _ => None,
    }
}

/// Detailed activity or route; only the map is of interest.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StravaDetail {
    #[serde(default)]
    pub map: Option<StravaMap>,
}

impl StravaDetail {
    /// Get the detailed polyline, falling back to summary if not available.
    pub fn get_polyline(&self) -> Option<&str> {
        let map = self.map.as_ref()?;
        map.polyline
            .as_deref()
            .filter(|p| !p.is_empty())
            .or(map.summary_polyline.as_deref())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StravaService - per-session client with the authorization flow
// ─────────────────────────────────────────────────────────────────────────────

/// Tells the user they need to (re-)authorize with Strava.
pub trait LoginPrompt: Send + Sync {
    /// `pending` identifies the authorization attempt; repeated prompts for
    /// the same attempt may be ignored.
    fn request_login(&self, pending: u64, session: &SessionId, url: &str);
}

/// Strava API access on behalf of one session.
///
/// Every call is retried exactly once after a successful interactive
/// authorization if it failed for lack of a credential.
#[derive(Clone)]
pub struct StravaService {
    auth: StravaAuth,
    pending: Arc<PendingAuthorizations>,
    session: SessionId,
    prompt: Arc<dyn LoginPrompt>,
}

impl StravaService {
    pub fn new(
        auth: StravaAuth,
        pending: Arc<PendingAuthorizations>,
        session: SessionId,
        prompt: Arc<dyn LoginPrompt>,
    ) -> Self {
        Self {
            auth,
            pending,
            session,
            prompt,
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    // ─── Authorization ───────────────────────────────────────────────────────

    /// Run the authorization flow now unless the session already has a
    /// usable token and a known athlete.
    pub async fn ensure_authorized(&self) -> Result<()> {
        if self.is_authorized().await? {
            return Ok(());
        }
        self.authorize().await?;
        if self.is_authorized().await? {
            Ok(())
        } else {
            Err(AppError::NeedsAuthorization)
        }
    }

    async fn is_authorized(&self) -> Result<bool> {
        let lookup = self.auth.access_token(&self.session).await?;
        if matches!(lookup, TokenLookup::RequiresLogin) {
            return Ok(false);
        }
        Ok(self.auth.athlete(&self.session).await?.is_some())
    }

    /// Prompt for login and wait for the OAuth callback (or the timeout).
    async fn authorize(&self) -> Result<()> {
        let registration = self.pending.register(&self.session);
        let url = self.auth.authorize_url(&self.session);
        self.prompt
            .request_login(registration.id(), &self.session, &url);

        match self.pending.wait(&self.session, registration).await {
            AuthOutcome::Authorized => {
                tracing::info!(session = %self.session, "Strava authorization completed");
                Ok(())
            }
            AuthOutcome::Denied(reason) => {
                tracing::warn!(session = %self.session, reason = %reason, "Strava authorization denied");
                Err(AppError::NeedsAuthorization)
            }
            AuthOutcome::TimedOut => {
                tracing::warn!(session = %self.session, "Strava authorization timed out");
                Err(AppError::NeedsAuthorization)
            }
        }
    }

    // ─── Generic call ────────────────────────────────────────────────────────

    /// Call an endpoint template (may contain `{athlete}`) with the session's token.
    pub async fn api<T: DeserializeOwned + Send>(
        &self,
        endpoint: &str,
        query: &[(&str, Option<i64>)],
    ) -> Result<T> {
        match self.try_api(endpoint, query).await {
            Err(AppError::NeedsAuthorization) => {
                tracing::info!(session = %self.session, endpoint, "Strava call needs authorization");
                self.authorize().await?;
                self.try_api(endpoint, query).await
            }
            other => other,
        }
    }

    async fn try_api<T: DeserializeOwned + Send>(
        &self,
        endpoint: &str,
        query: &[(&str, Option<i64>)],
    ) -> Result<T> {
        let path = self.resolve_endpoint(endpoint).await?;
        let access_token = match self.auth.access_token(&self.session).await? {
            TokenLookup::Authorized(token) => token,
            TokenLookup::RequiresLogin => return Err(AppError::NeedsAuthorization),
        };

        match self.auth.client().get_json(&access_token, &path, query).await {
            Err(AppError::NeedsAuthorization) => {
                self.auth.forget_access_token(&self.session).await?;
                Err(AppError::NeedsAuthorization)
            }
            other => other,
        }
    }

    /// Substitute `{placeholder}`s in an endpoint template.
    async fn resolve_endpoint(&self, template: &str) -> Result<String> {
        let mut resolved = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            let close = rest[open..]
                .find('}')
                .map(|offset| open + offset)
                .ok_or_else(|| {
                    AppError::Internal(anyhow::anyhow!("Unterminated placeholder in {}", template))
                })?;
            resolved.push_str(&rest[..open]);
            match rest[open + 1..close].trim() {
                "athlete" => {
                    let athlete = self
                        .auth
                        .athlete(&self.session)
                        .await?
                        .ok_or(AppError::NeedsAuthorization)?;
                    resolved.push_str(&athlete.to_string());
                }
                other => {
                    return Err(AppError::Internal(anyhow::anyhow!(
                        "Unknown interpolation {:?}",
                        other
                    )))
                }
            }
            rest = &rest[close + 1..];
        }

        resolved.push_str(rest);
        Ok(resolved)
    }

    // ─── API Wrappers ────────────────────────────────────────────────────────

    /// One page of the athlete's activities, optionally limited to `window`.
    pub async fn activities_page(
        &self,
        page: i64,
        window: TimeRange,
    ) -> Result<Vec<SummaryActivity>> {
        self.api(
            "/athlete/activities",
            &[
                ("per_page", Some(PAGE_SIZE)),
                ("page", Some(page)),
                ("before", window.end),
                ("after", window.start),
            ],
        )
        .await
    }

    /// One page of the athlete's routes.
    pub async fn routes_page(&self, page: i64) -> Result<Vec<SummaryRoute>> {
        self.api(
            "/athletes/{athlete}/routes",
            &[("per_page", Some(PAGE_SIZE)), ("page", Some(page))],
        )
        .await
    }

    /// Get a detailed activity by ID.
    pub async fn get_activity(&self, activity_id: u64) -> Result<StravaDetail> {
        self.api(&format!("/activities/{}", activity_id), &[]).await
    }

    /// Get a detailed route by ID.
    pub async fn get_route(&self, route_id: &str) -> Result<StravaDetail> {
        if route_id.is_empty() || !route_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AppError::BadRequest(format!("Invalid route id {:?}", route_id)));
        }
        self.api(&format!("/routes/{}", route_id), &[]).await
    }

    pub fn activity_pages(&self, window: TimeRange) -> ActivityPages {
        ActivityPages {
            strava: self.clone(),
            window,
            page: 1,
            exhausted: false,
        }
    }

    pub fn route_pages(&self) -> RoutePages {
        RoutePages {
            strava: self.clone(),
            page: 1,
            exhausted: false,
        }
    }
}

/// Cursor over the athlete's activities within a time window.
pub struct ActivityPages {
    strava: StravaService,
    window: TimeRange,
    page: i64,
    exhausted: bool,
}

impl PageSource for ActivityPages {
    type Item = SummaryActivity;

    async fn next_page(&mut self) -> Result<Vec<SummaryActivity>> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let page = self.strava.activities_page(self.page, self.window).await?;
        tracing::debug!(page = self.page, len = page.len(), "Fetched activities page");
        self.exhausted = page.is_empty();
        self.page += 1;
        Ok(page)
    }
}

/// Cursor over the athlete's routes.
pub struct RoutePages {
    strava: StravaService,
    page: i64,
    exhausted: bool,
}

impl PageSource for RoutePages {
    type Item = SummaryRoute;

    async fn next_page(&mut self) -> Result<Vec<SummaryRoute>> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        let page = self.strava.routes_page(self.page).await?;
        tracing::debug!(page = self.page, len = page.len(), "Fetched routes page");
        self.exhausted = page.is_empty();
        self.page += 1;
        Ok(page)
    }
}
