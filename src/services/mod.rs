// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod auth;
pub mod eager;
pub mod ordering;
pub mod strava;

pub use auth::{AuthOutcome, PendingAuthorizations, StravaAuth, TokenLookup};
pub use eager::{EagerPages, PageSource};
pub use ordering::{sort_by_completion, InOrder};
pub use strava::{LoginPrompt, StravaClient, StravaService};
