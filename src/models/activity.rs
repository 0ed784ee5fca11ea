// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Activity and route summaries as sent to the client.

use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Identifier of an activity (numeric) or a route (string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[serde(untagged)]
pub enum ItemId {
    Number(u64),
    Text(String),
}

impl ItemId {
    /// Key used for the polyline cache and the `maps` chunk.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Number(id) => write!(f, "{}", id),
            ItemId::Text(id) => f.write_str(id),
        }
    }
}

/// Summary of an activity or route, without its polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "client/src/generated/")
)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub route: bool,
    pub id: ItemId,
    pub name: String,
    /// Start (activities) or creation (routes) time, milliseconds since the epoch
    pub date: i64,
    /// Sport type (Ride, Run, Walk, ...)
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
}

/// Polyline for one activity or route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityMap {
    pub id: ItemId,
    pub polyline: String,
}

/// A summary together with the low-detail polyline it was listed with.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedSummary {
    pub summary: Summary,
    pub map: ActivityMap,
}
