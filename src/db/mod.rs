// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistence layer (per-session credential files).

pub mod sessions;

pub use sessions::SessionStore;
