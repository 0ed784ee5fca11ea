// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WebSocket message types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

use crate::models::{ItemId, Summary, TimeRange};

/// A request from the browser. Fields may be combined in one message.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "client/src/generated/")
)]
pub struct ClientMessage {
    /// Time windows of activities to list
    #[serde(default)]
    pub activities: Option<Vec<TimeRange>>,
    /// List the athlete's routes
    #[serde(default)]
    pub routes: bool,
    /// Detailed polylines wanted for these ids
    #[serde(default)]
    pub maps: Option<Vec<ItemId>>,
}

/// Progress of listing activities and routes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
pub struct FindingStats {
    pub started: bool,
    pub finished: bool,
    /// Raw records received from Strava on this connection
    pub length: usize,
}

/// Which request an `error` message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Activities,
    Routes,
    Maps,
}

/// A message to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "client/src/generated/")
)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Stats {
        finding: FindingStats,
    },
    Activities {
        activities: Vec<Summary>,
    },
    Routes {
        routes: Vec<Summary>,
    },
    Maps {
        chunk: HashMap<String, String>,
    },
    /// The user must visit `url`; `cookie` is the session token to keep.
    Login {
        cookie: String,
        url: String,
    },
    Error {
        request: RequestKind,
        message: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
