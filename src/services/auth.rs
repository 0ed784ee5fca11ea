// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava credential lifecycle for a session.
//!
//! [`StravaAuth`] turns the stored credential into a usable access token,
//! refreshing it when needed, and records tokens obtained from the OAuth
//! callback. [`PendingAuthorizations`] pairs a waiting sync request with
//! the callback that eventually completes its login.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::db::SessionStore;
use crate::error::{AppError, Result};
use crate::models::{CredentialState, SessionId};
use crate::services::strava::{StravaClient, TokenResponse};

/// Access tokens are never used for longer than this, whatever Strava says.
pub const ACCESS_TOKEN_LIFETIME_SECS: i64 = 60 * 60;

/// How long a login prompt stays open before the waiting request gives up.
pub const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Per-session mutex to serialize token refresh operations.
pub type RefreshLocks = Arc<DashMap<SessionId, Arc<Mutex<()>>>>;

/// Result of looking up a session's access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenLookup {
    Authorized(String),
    /// No credential, or the refresh token was rejected.
    RequiresLogin,
}

/// Token management for sessions, shared by every connection.
#[derive(Clone)]
pub struct StravaAuth {
    client: StravaClient,
    sessions: SessionStore,
    redirect_uri: String,
    refresh_locks: RefreshLocks,
}

impl StravaAuth {
    pub fn new(client: StravaClient, sessions: SessionStore, redirect_uri: String) -> Self {
        Self {
            client,
            sessions,
            redirect_uri,
            refresh_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn client(&self) -> &StravaClient {
        &self.client
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn authorize_url(&self, session: &SessionId) -> String {
        self.client.authorize_url(&self.redirect_uri, session)
    }

    /// Get a valid access token for the session, refreshing if necessary.
    ///
    /// 1. Use the stored access token if it is not about to expire
    /// 2. Otherwise take the per-session refresh lock and re-check
    /// 3. Refresh with Strava and persist the new tokens
    /// 4. If Strava rejects the refresh token, forget it (unless another
    ///    process already replaced it) and report that login is required
    pub async fn access_token(&self, session: &SessionId) -> Result<TokenLookup> {
        let now = Utc::now();
        let credential = self.sessions.read(session).await?;
        match credential.state(now) {
            CredentialState::NoCredential => return Ok(TokenLookup::RequiresLogin),
            CredentialState::HasAccessToken => {
                if let Some(token) = credential.valid_access_token(now) {
                    return Ok(TokenLookup::Authorized(token.to_string()));
                }
            }
            CredentialState::HasRefreshToken => {}
        }

        let lock = self
            .refresh_locks
            .entry(session.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let lookup = {
            let _guard = lock.lock().await;
            self.refresh_locked(session).await
        };

        drop(lock);
        self.refresh_locks
            .remove_if(session, |_, lock| Arc::strong_count(lock) == 1);
        lookup
    }

    async fn refresh_locked(&self, session: &SessionId) -> Result<TokenLookup> {
        // Another task may have refreshed while we were waiting.
        let credential = self.sessions.read(session).await?;
        if let Some(token) = credential.valid_access_token(Utc::now()) {
            return Ok(TokenLookup::Authorized(token.to_string()));
        }
        let Some(refresh_token) = credential.strava_refresh_token else {
            return Ok(TokenLookup::RequiresLogin);
        };

        tracing::info!(session = %session, "Access token expired, refreshing");
        let tokens = match self.client.refresh_token(&refresh_token).await {
            Ok(tokens) => tokens,
            Err(AppError::NeedsAuthorization) => {
                return self.discard_refresh_token(session, &refresh_token).await
            }
            Err(e) => return Err(e),
        };

        let access_token = self.store_tokens(session, tokens).await?;
        tracing::info!(session = %session, "Token refreshed");
        Ok(TokenLookup::Authorized(access_token))
    }

    async fn discard_refresh_token(
        &self,
        session: &SessionId,
        rejected: &str,
    ) -> Result<TokenLookup> {
        let now = Utc::now();
        let mut replacement = None;
        self.sessions
            .update(session, |credential| {
                if credential.strava_refresh_token.as_deref() == Some(rejected) {
                    credential.strava_refresh_token = None;
                    credential.clear_access_token();
                } else {
                    replacement = credential.valid_access_token(now).map(str::to_string);
                }
            })
            .await?;

        match replacement {
            Some(token) => {
                tracing::info!(session = %session, "Refresh race lost, using the winner's token");
                Ok(TokenLookup::Authorized(token))
            }
            None => {
                tracing::info!(session = %session, "Refresh token revoked, login required");
                Ok(TokenLookup::RequiresLogin)
            }
        }
    }

    /// Complete the OAuth callback: exchange `code` and store the tokens.
    pub async fn exchange_code(&self, session: &SessionId, code: &str) -> Result<()> {
        let tokens = self.client.exchange_code(code).await?;
        self.store_tokens(session, tokens).await?;
        tracing::info!(session = %session, "Strava tokens stored");
        Ok(())
    }

    /// Drop the access token (keeping the refresh token) after Strava rejected it.
    pub async fn forget_access_token(&self, session: &SessionId) -> Result<()> {
        self.sessions
            .update(session, |credential| credential.clear_access_token())
            .await?;
        Ok(())
    }

    /// The session's Strava athlete ID, once known.
    pub async fn athlete(&self, session: &SessionId) -> Result<Option<u64>> {
        Ok(self.sessions.read(session).await?.strava_athlete)
    }

    async fn store_tokens(&self, session: &SessionId, tokens: TokenResponse) -> Result<String> {
        let expiry = tokens
            .expires_at
            .min(Utc::now().timestamp() + ACCESS_TOKEN_LIFETIME_SECS);
        let athlete = tokens.athlete.as_ref().map(|athlete| athlete.id);
        let access_token = tokens.access_token.clone();

        self.sessions
            .update(session, move |credential| {
                credential.strava_access_token = Some(tokens.access_token);
                credential.strava_refresh_token = Some(tokens.refresh_token);
                credential.strava_expiry = Some(expiry);
                if let Some(athlete) = athlete {
                    credential.learn_athlete(athlete);
                }
            })
            .await?;

        Ok(access_token)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending authorizations
// ─────────────────────────────────────────────────────────────────────────────

/// How a login prompt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized,
    Denied(String),
    TimedOut,
}

struct PendingAuthorization {
    id: u64,
    resolve: watch::Sender<Option<AuthOutcome>>,
    expires_at: Instant,
}

/// A request's stake in a pending authorization.
#[derive(Debug)]
pub struct Registration {
    id: u64,
    outcome: watch::Receiver<Option<AuthOutcome>>,
    expires_at: Instant,
}

impl Registration {
    /// Identifies the prompt; requests joining an open prompt share its id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Open login prompts, keyed by the session they will authorize.
///
/// The session token doubles as the OAuth `state`, so the callback finds
/// its entry directly.
pub struct PendingAuthorizations {
    table: DashMap<SessionId, PendingAuthorization>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl Default for PendingAuthorizations {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingAuthorizations {
    pub fn new() -> Self {
        Self::with_timeout(AUTHORIZATION_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            table: DashMap::new(),
            next_id: AtomicU64::new(1),
            timeout,
        }
    }

    /// Join the session's open prompt, or open a new one.
    pub fn register(&self, session: &SessionId) -> Registration {
        let now = Instant::now();
        match self.table.entry(session.clone()) {
            Entry::Occupied(entry) if entry.get().expires_at > now => {
                let pending = entry.get();
                Registration {
                    id: pending.id,
                    outcome: pending.resolve.subscribe(),
                    expires_at: pending.expires_at,
                }
            }
            entry => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (resolve, outcome) = watch::channel(None);
                let expires_at = now + self.timeout;
                let pending = PendingAuthorization {
                    id,
                    resolve,
                    expires_at,
                };
                match entry {
                    Entry::Occupied(mut stale) => {
                        stale.insert(pending);
                    }
                    Entry::Vacant(vacant) => {
                        vacant.insert(pending);
                    }
                }
                tracing::info!(session = %session, pending = id, "Waiting for Strava authorization");
                Registration {
                    id,
                    outcome,
                    expires_at,
                }
            }
        }
    }

    /// Whether an unexpired prompt exists for this OAuth `state`.
    pub fn is_pending(&self, state: &SessionId) -> bool {
        self.table
            .get(state)
            .is_some_and(|pending| pending.expires_at > Instant::now())
    }

    /// Finish the prompt for `state`, waking every waiter.
    ///
    /// Returns false if nothing was pending.
    pub fn resolve(&self, state: &SessionId, outcome: AuthOutcome) -> bool {
        match self.table.remove(state) {
            Some((_, pending)) => {
                tracing::debug!(session = %state, pending = pending.id, outcome = ?outcome, "Authorization resolved");
                pending.resolve.send_replace(Some(outcome));
                true
            }
            None => false,
        }
    }

    /// Wait for the prompt behind `registration` to be resolved or expire.
    pub async fn wait(&self, session: &SessionId, registration: Registration) -> AuthOutcome {
        let Registration {
            id,
            mut outcome,
            expires_at,
        } = registration;

        let resolved = match tokio::time::timeout_at(expires_at, outcome.wait_for(Option::is_some))
            .await
        {
            Ok(Ok(value)) => value.clone(),
            // Sender gone: the prompt was replaced after expiring.
            Ok(Err(_)) => None,
            Err(_) => None,
        };

        resolved.unwrap_or_else(|| {
            self.table.remove_if(session, |_, pending| pending.id == id);
            AuthOutcome::TimedOut
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Credential;

    #[tokio::test]
    async fn test_concurrent_waiters_share_one_prompt() {
        let pending = Arc::new(PendingAuthorizations::new());
        let session = SessionId::generate();

        let first = pending.register(&session);
        let second = pending.register(&session);
        assert_eq!(first.id(), second.id());
        assert!(pending.is_pending(&session));

        let waiters = [first, second].map(|registration| {
            let pending = Arc::clone(&pending);
            let session = session.clone();
            tokio::spawn(async move { pending.wait(&session, registration).await })
        });

        assert!(pending.resolve(&session, AuthOutcome::Authorized));
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), AuthOutcome::Authorized);
        }
        assert!(!pending.is_pending(&session));
    }

    #[tokio::test]
    async fn test_unknown_state_is_not_resolved() {
        let pending = PendingAuthorizations::new();
        assert!(!pending.resolve(&SessionId::generate(), AuthOutcome::Authorized));
    }

    #[tokio::test]
    async fn test_prompt_times_out_and_is_removed() {
        let pending = PendingAuthorizations::with_timeout(Duration::from_millis(20));
        let session = SessionId::generate();

        let registration = pending.register(&session);
        let first_id = registration.id();
        assert_eq!(pending.wait(&session, registration).await, AuthOutcome::TimedOut);
        assert!(!pending.is_pending(&session));

        // A later prompt gets a fresh id.
        let registration = pending.register(&session);
        assert_ne!(registration.id(), first_id);
    }

    #[tokio::test]
    async fn test_expired_prompt_is_replaced() {
        let pending = PendingAuthorizations::with_timeout(Duration::from_millis(10));
        let session = SessionId::generate();

        let stale = pending.register(&session);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fresh = pending.register(&session);
        assert_ne!(stale.id(), fresh.id());
    }

    fn auth(dir: &tempfile::TempDir) -> StravaAuth {
        StravaAuth::new(
            StravaClient::new("id".to_string(), "secret".to_string())
                .with_base_urls("http://127.0.0.1:9", "http://127.0.0.1:9"),
            SessionStore::new(dir.path(), 3),
            "http://localhost:3000/api/token".to_string(),
        )
    }

    #[tokio::test]
    async fn test_valid_access_token_is_used_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth(&dir);
        let session = SessionId::generate();
        auth.sessions()
            .update(&session, |c| {
                c.strava_access_token = Some("access".to_string());
                c.strava_expiry = Some(Utc::now().timestamp() + 600);
            })
            .await
            .unwrap();

        assert_eq!(
            auth.access_token(&session).await.unwrap(),
            TokenLookup::Authorized("access".to_string())
        );
    }

    #[tokio::test]
    async fn test_refresh_lock_is_dropped_after_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth(&dir);
        let session = SessionId::generate();
        auth.sessions()
            .update(&session, |c| {
                c.strava_refresh_token = Some("refresh".to_string());
                c.strava_access_token = Some("old".to_string());
                c.strava_expiry = Some(Utc::now().timestamp() - 10);
            })
            .await
            .unwrap();

        // Nothing listens on the token endpoint, so the refresh fails.
        assert!(auth.access_token(&session).await.is_err());
        assert!(auth.refresh_locks.is_empty());
    }

    #[tokio::test]
    async fn test_no_credential_requires_login() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth(&dir);
        assert_eq!(
            auth.access_token(&SessionId::generate()).await.unwrap(),
            TokenLookup::RequiresLogin
        );
    }

    #[tokio::test]
    async fn test_forget_access_token_keeps_refresh_token() {
        let dir = tempfile::tempdir().unwrap();
        let auth = auth(&dir);
        let session = SessionId::generate();
        auth.sessions()
            .update(&session, |c| {
                c.strava_refresh_token = Some("refresh".to_string());
                c.strava_access_token = Some("access".to_string());
                c.strava_expiry = Some(Utc::now().timestamp() + 600);
                c.learn_athlete(5);
            })
            .await
            .unwrap();

        auth.forget_access_token(&session).await.unwrap();

        let credential = auth.sessions().read(&session).await.unwrap();
        assert_eq!(
            credential,
            Credential {
                strava_refresh_token: Some("refresh".to_string()),
                strava_athlete: Some(5),
                strava_access_token: None,
                strava_expiry: None,
            }
        );
        assert_eq!(auth.athlete(&session).await.unwrap(), Some(5));
    }
}
