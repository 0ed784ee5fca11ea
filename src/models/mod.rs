// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod session;
pub mod time_range;

pub use activity::{ActivityMap, ItemId, MappedSummary, Summary};
pub use session::{Credential, CredentialState, SessionId};
pub use time_range::{TimeRange, Timestamp};
