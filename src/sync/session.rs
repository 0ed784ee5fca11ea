// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-connection sync state and request handling.
//!
//! A `SyncSession` lives as long as one WebSocket connection. It remembers
//! which time windows were already listed, the low-detail polylines seen in
//! listings (each handed out at most once) and which ids are routes.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::error::{AppError, Result};
use crate::models::{ActivityMap, ItemId, MappedSummary, Summary, TimeRange};
use crate::services::eager::{EagerPages, PageSource};
use crate::services::ordering::{sort_by_completion, InOrder};
use crate::services::strava::{StravaService, SummaryActivity, SummaryRoute};
use crate::shutdown::Shutdown;
use crate::sync::outbox::Outbox;
use crate::sync::protocol::{ClientMessage, FindingStats, RequestKind, ServerMessage};

/// Polylines per `maps` message.
pub const MAP_CHUNK_SIZE: usize = 50;

#[derive(Debug, Default)]
struct Progress {
    stats: FindingStats,
    /// Activity/route requests currently running
    active: usize,
}

enum Drained {
    Complete,
    Abandoned,
}

/// A listing record that can be reduced to a summary plus polyline.
trait Listed: Send + 'static {
    fn into_mapped(self) -> Option<MappedSummary>;
}

impl Listed for SummaryActivity {
    fn into_mapped(self) -> Option<MappedSummary> {
        SummaryActivity::into_mapped(self)
    }
}

impl Listed for SummaryRoute {
    fn into_mapped(self) -> Option<MappedSummary> {
        SummaryRoute::into_mapped(self)
    }
}

pub struct SyncSession {
    strava: StravaService,
    outbox: Outbox,
    shutdown: Shutdown,
    progress: Mutex<Progress>,
    fetched: Mutex<Vec<TimeRange>>,
    polylines: Mutex<HashMap<String, String>>,
    route_ids: Mutex<HashSet<String>>,
    maps_in_order: InOrder,
}

impl SyncSession {
    pub fn new(strava: StravaService, outbox: Outbox, shutdown: Shutdown) -> Arc<Self> {
        Arc::new(Self {
            strava,
            outbox,
            shutdown,
            progress: Mutex::new(Progress::default()),
            fetched: Mutex::new(Vec::new()),
            polylines: Mutex::new(HashMap::new()),
            route_ids: Mutex::new(HashSet::new()),
            maps_in_order: InOrder::new(),
        })
    }

    /// Handle one text frame from the client.
    ///
    /// Work is spawned so the reader can keep receiving; a malformed message
    /// is logged and ignored.
    pub fn dispatch(self: &Arc<Self>, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed client message");
                return;
            }
        };

        if message.activities.is_some() || message.routes {
            let session = Arc::clone(self);
            tokio::spawn(session.find(message.activities, message.routes));
        }

        if let Some(ids) = message.maps {
            tokio::spawn(self.send_maps(ids));
        }
    }

    /// Connection closed: stop emitting.
    pub fn close(&self) {
        self.outbox.close();
    }

    pub fn stats(&self) -> FindingStats {
        lock(&self.progress).stats
    }

    // ─── Finding (activities and routes) ─────────────────────────────────────

    async fn find(self: Arc<Self>, activities: Option<Vec<TimeRange>>, routes: bool) {
        let claimed = activities.as_deref().map(|requested| self.claim(requested));
        let listing = routes || claimed.as_ref().is_some_and(|windows| !windows.is_empty());

        // The login prompt has to reach the client before any stats.
        if listing {
            if let Err(e) = self.strava.ensure_authorized().await {
                if let Some(windows) = claimed {
                    windows.into_iter().for_each(|window| self.release(window));
                    self.report(RequestKind::Activities, &e);
                }
                if routes {
                    self.report(RequestKind::Routes, &e);
                }
                return;
            }
        }

        self.begin_finding();
        if let Some(windows) = claimed {
            self.sync_activities(windows).await;
        }
        if routes {
            self.sync_routes().await;
        }
        self.end_finding();
    }

    async fn sync_activities(&self, claimed: Vec<TimeRange>) {
        if claimed.is_empty() {
            tracing::debug!(session = %self.strava.session(), "Requested activities already listed");
            return;
        }

        for window in claimed {
            if !self.outbox.is_live() {
                self.release(window);
                continue;
            }

            let pages = EagerPages::new(self.strava.activity_pages(window));
            match self
                .drain(pages, |activities| ServerMessage::Activities { activities })
                .await
            {
                Ok(Drained::Complete) => {}
                Ok(Drained::Abandoned) => self.release(window),
                Err(e) => {
                    self.release(window);
                    self.report(RequestKind::Activities, &e);
                }
            }
        }
    }

    async fn sync_routes(&self) {
        let pages = EagerPages::new(self.strava.route_pages());
        if let Err(e) = self
            .drain(pages, |routes| ServerMessage::Routes { routes })
            .await
        {
            self.report(RequestKind::Routes, &e);
        }
    }

    /// Emit every page from `pages`, followed each time by the stats.
    async fn drain<S>(
        &self,
        mut pages: EagerPages<S>,
        wrap: fn(Vec<Summary>) -> ServerMessage,
    ) -> Result<Drained>
    where
        S: PageSource,
        S::Item: Listed,
    {
        while let Some(page) = pages.next().await {
            if !self.outbox.is_live() {
                pages.close();
                return Ok(Drained::Abandoned);
            }
            let summaries = self.record_page(page?);
            self.outbox.send(wrap(summaries));
            self.send_stats();
        }
        Ok(Drained::Complete)
    }

    /// Count a raw page, cache its polylines and return the summaries.
    fn record_page<T: Listed>(&self, page: Vec<T>) -> Vec<Summary> {
        lock(&self.progress).stats.length += page.len();

        let mapped: Vec<MappedSummary> = page.into_iter().filter_map(Listed::into_mapped).collect();

        {
            let mut route_ids = lock(&self.route_ids);
            route_ids.extend(
                mapped
                    .iter()
                    .filter(|m| m.summary.route)
                    .map(|m| m.map.id.key()),
            );
        }

        let mut polylines = lock(&self.polylines);
        mapped
            .into_iter()
            .map(|MappedSummary { summary, map }| {
                polylines.insert(map.id.key(), map.polyline);
                summary
            })
            .collect()
    }

    /// Mark the uncovered part of `requested` as fetched and return it.
    fn claim(&self, requested: &[TimeRange]) -> Vec<TimeRange> {
        let now = Utc::now().timestamp();
        let mut fetched = lock(&self.fetched);
        let uncovered = TimeRange::uncovered(requested, &fetched, 0, now);
        if !uncovered.is_empty() {
            let mut covered = fetched.clone();
            covered.extend_from_slice(&uncovered);
            *fetched = TimeRange::merge(&covered);
        }
        uncovered
    }

    /// Forget a window so a later request lists it again.
    fn release(&self, window: TimeRange) {
        let mut fetched = lock(&self.fetched);
        *fetched = TimeRange::subtract(&fetched, &[window]);
    }

    fn begin_finding(&self) {
        {
            let mut progress = lock(&self.progress);
            if progress.active == 0 {
                progress.stats.length = 0;
            }
            progress.active += 1;
            progress.stats.started = true;
            progress.stats.finished = false;
        }
        self.send_stats();
    }

    fn end_finding(&self) {
        {
            let mut progress = lock(&self.progress);
            progress.active = progress.active.saturating_sub(1);
            progress.stats.finished = progress.active == 0;
        }
        self.send_stats();
    }

    fn send_stats(&self) {
        let finding = self.stats();
        self.outbox.send(ServerMessage::Stats { finding });
    }

    fn report(&self, request: RequestKind, err: &AppError) {
        if err.is_fatal() {
            self.shutdown.trigger(&err.to_string());
        }
        tracing::warn!(
            session = %self.strava.session(),
            request = ?request,
            error = %err,
            "Request failed"
        );
        self.outbox.send(ServerMessage::Error {
            request,
            message: err.to_string(),
        });
    }

    // ─── Maps ────────────────────────────────────────────────────────────────

    /// Start fetching polylines for `ids`.
    ///
    /// Lookups start immediately, but this request's `maps` messages are
    /// only emitted after those of every earlier maps request.
    pub fn send_maps(self: &Arc<Self>, ids: Vec<ItemId>) -> impl Future<Output = ()> + Send + 'static {
        tracing::debug!(session = %self.strava.session(), count = ids.len(), "Maps requested");

        let lookups: Vec<_> = ids
            .into_iter()
            .map(|id| Arc::clone(self).lookup_map(id))
            .collect();
        let session = Arc::clone(self);

        self.maps_in_order.run(async move {
            let receivers = sort_by_completion(lookups);
            async move { session.emit_maps(receivers).await }
        })
    }

    async fn emit_maps(&self, receivers: Vec<oneshot::Receiver<Option<ActivityMap>>>) {
        let mut chunk = HashMap::new();
        for receiver in receivers {
            if !self.outbox.is_live() {
                return;
            }
            let Ok(Some(map)) = receiver.await else {
                continue;
            };
            chunk.insert(map.id.key(), map.polyline);
            if chunk.len() >= MAP_CHUNK_SIZE {
                self.outbox.send(ServerMessage::Maps {
                    chunk: std::mem::take(&mut chunk),
                });
            }
        }
        if !chunk.is_empty() {
            self.outbox.send(ServerMessage::Maps { chunk });
        }
        self.send_stats();
    }

    /// Polyline for one id: the cached summary polyline if we still hold
    /// it, otherwise the detailed one from Strava.
    async fn lookup_map(self: Arc<Self>, id: ItemId) -> Option<ActivityMap> {
        let key = id.key();
        let cached = lock(&self.polylines).remove(&key);
        if let Some(polyline) = cached {
            return Some(ActivityMap { id, polyline });
        }

        let is_route = lock(&self.route_ids).contains(&key);
        let detail = if is_route {
            self.strava.get_route(&key).await
        } else {
            match &id {
                ItemId::Number(activity_id) => self.strava.get_activity(*activity_id).await,
                ItemId::Text(text) => match text.parse::<u64>() {
                    Ok(activity_id) => self.strava.get_activity(activity_id).await,
                    Err(_) => Err(AppError::BadRequest(format!("Unknown id {:?}", text))),
                },
            }
        };

        match detail {
            Ok(detail) => match detail.get_polyline() {
                Some(polyline) => Some(ActivityMap {
                    polyline: polyline.to_string(),
                    id,
                }),
                None => {
                    tracing::debug!(id = %key, "No polyline in detail");
                    None
                }
            },
            Err(e) => {
                if e.is_fatal() {
                    self.shutdown.trigger(&e.to_string());
                }
                tracing::warn!(id = %key, error = %e, "Failed to fetch map");
                None
            }
        }
    }
}

/// Lock a short-lived per-connection mutex; a panic elsewhere does not
/// invalidate this state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
