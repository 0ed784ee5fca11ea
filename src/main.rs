// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava heatmapper server
//!
//! Serves the activity WebSocket and the OAuth callback.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use strava_heatmapper::{config::Config, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for open connections to finish after a fatal error.
const FATAL_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(port = config.port, domain = %config.domain, "Starting Strava heatmapper");

    let state = Arc::new(AppState::new(config.clone()));
    state.auth.sessions().init().await?;
    tracing::info!(dir = %state.auth.sessions().dir().display(), "Session store ready");

    // Build router
    let app = strava_heatmapper::routes::create_router(state.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    let shutdown = state.shutdown.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown));

    let fatal = state.shutdown.clone();
    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            fatal.triggered().await;
            tokio::time::sleep(FATAL_GRACE_PERIOD).await;
        } => tracing::warn!("Connections did not drain in time"),
    }

    if state.shutdown.is_triggered() {
        anyhow::bail!("Shut down after a fatal Strava token endpoint error");
    }

    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(shutdown: strava_heatmapper::shutdown::Shutdown) {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = shutdown.triggered() => {}
    }
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(
                    "strava_heatmapper=debug"
                        .parse()
                        .expect("valid directive"),
                )
                .add_directive("info".parse().expect("valid directive")),
        )
        .with(format)
        .init();
}
