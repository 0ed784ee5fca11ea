// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use std::env;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_LOCK_RETRIES: u32 = 20;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Strava OAuth client ID (public)
    pub strava_client_id: String,
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// Public origin of this server, used for the OAuth redirect URI
    pub domain: String,
    /// Server port
    pub port: u16,
    /// Directory holding one credential file per session
    pub sessions_dir: PathBuf,
    /// How often to retry a contended session lock before giving up
    pub session_lock_retries: u32,
    /// Strava REST API base URL
    pub strava_api_url: String,
    /// Strava OAuth base URL (`/authorize` and `/token` live below it)
    pub strava_oauth_url: String,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            strava_client_id: "test_client_id".to_string(),
            strava_client_secret: "test_secret".to_string(),
            domain: format!("http://localhost:{}", DEFAULT_PORT),
            port: DEFAULT_PORT,
            sessions_dir: PathBuf::from("sessions"),
            session_lock_retries: DEFAULT_LOCK_RETRIES,
            strava_api_url: "https://www.strava.com/api/v3".to_string(),
            strava_oauth_url: "https://www.strava.com/oauth".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is honoured for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();
        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid("PORT", raw))?,
            Err(_) => DEFAULT_PORT,
        };
        let session_lock_retries = match env::var("SESSION_LOCK_RETRIES") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("SESSION_LOCK_RETRIES", raw))?,
            Err(_) => DEFAULT_LOCK_RETRIES,
        };

        Ok(Self {
            strava_client_id: env::var("STRAVA_CLIENT_ID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_ID"))?,
            strava_client_secret: env::var("STRAVA_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_SECRET"))?,
            domain: env::var("DOMAIN")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            port,
            sessions_dir: env::var("SESSIONS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.sessions_dir),
            session_lock_retries,
            strava_api_url: env::var("STRAVA_API_URL").unwrap_or(defaults.strava_api_url),
            strava_oauth_url: env::var("STRAVA_OAUTH_URL").unwrap_or(defaults.strava_oauth_url),
        })
    }

    /// Redirect URI registered with Strava for the OAuth callback.
    pub fn callback_url(&self) -> String {
        format!("{}/api/token", self.domain)
    }

    /// Whether session cookies should carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.domain.starts_with("https://")
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1:?}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("STRAVA_CLIENT_ID", "test_id");
        env::set_var("STRAVA_CLIENT_SECRET", " test_secret\n");
        env::set_var("DOMAIN", "https://heatmap.example.com/");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.strava_client_id, "test_id");
        assert_eq!(config.strava_client_secret, "test_secret");
        assert_eq!(config.domain, "https://heatmap.example.com");
        assert_eq!(config.callback_url(), "https://heatmap.example.com/api/token");
        assert!(config.secure_cookies());
    }

    #[test]
    fn test_default_config_is_local() {
        let config = Config::default();
        assert_eq!(config.callback_url(), "http://localhost:3000/api/token");
        assert!(!config.secure_cookies());
    }
}
