// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Paginated fetching with one page of look-ahead.
//!
//! `EagerPages` keeps exactly one fetch in flight: while the caller works
//! on page N, page N+1 is already being requested on a spawned task.

use std::future::Future;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};

/// A pull-based producer of pages.
///
/// Implementations keep their own cursor (page index, exhausted flag).
/// An empty page marks the end of the sequence.
pub trait PageSource: Send + 'static {
    type Item: Send + 'static;

    fn next_page(&mut self) -> impl Future<Output = Result<Vec<Self::Item>>> + Send;
}

type InFlight<S> = JoinHandle<(S, Result<Vec<<S as PageSource>::Item>>)>;

/// Prefetching iterator over a [`PageSource`].
pub struct EagerPages<S: PageSource> {
    in_flight: Option<InFlight<S>>,
}

impl<S: PageSource> EagerPages<S> {
    /// Wrap `source` and immediately start fetching its first page.
    pub fn new(source: S) -> Self {
        Self {
            in_flight: Some(spawn_fetch(source)),
        }
    }

    /// Next page, or `None` once the source is exhausted, failed or closed.
    ///
    /// An error is yielded once and ends the sequence.
    pub async fn next(&mut self) -> Option<Result<Vec<S::Item>>> {
        let fetch = self.in_flight.take()?;
        let (source, page) = match fetch.await {
            Ok(done) => done,
            Err(e) => {
                return Some(Err(AppError::Internal(anyhow::anyhow!(
                    "Page fetch task failed: {}",
                    e
                ))))
            }
        };

        match page {
            Ok(items) if items.is_empty() => None,
            Ok(items) => {
                self.in_flight = Some(spawn_fetch(source));
                Some(Ok(items))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Stop fetching. The in-flight request is left to finish and its page dropped.
    pub fn close(&mut self) {
        // Dropping a JoinHandle detaches the task.
        self.in_flight = None;
    }

    pub fn is_done(&self) -> bool {
        self.in_flight.is_none()
    }
}

fn spawn_fetch<S: PageSource>(mut source: S) -> InFlight<S> {
    tokio::spawn(async move {
        let page = source.next_page().await;
        (source, page)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingPages {
        pages: Vec<Vec<u32>>,
        next: usize,
        started: Arc<AtomicUsize>,
        fail_at: Option<usize>,
    }

    impl CountingPages {
        fn new(pages: Vec<Vec<u32>>, started: Arc<AtomicUsize>) -> Self {
            Self {
                pages,
                next: 0,
                started,
                fail_at: None,
            }
        }
    }

    impl PageSource for CountingPages {
        type Item = u32;

        async fn next_page(&mut self) -> Result<Vec<u32>> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let index = self.next;
            self.next += 1;
            if self.fail_at == Some(index) {
                return Err(AppError::StravaApi("HTTP 500".to_string()));
            }
            Ok(self.pages.get(index).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_next_page_is_requested_before_consumer_asks() {
        let started = Arc::new(AtomicUsize::new(0));
        let source = CountingPages::new(vec![vec![1], vec![2], vec![3]], started.clone());
        let mut pages = EagerPages::new(source);

        let first = pages.next().await.unwrap().unwrap();
        assert_eq!(first, vec![1]);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2, "page 2 should be prefetched");

        // Still bounded to one page of look-ahead.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_yields_all_pages_then_ends() {
        let started = Arc::new(AtomicUsize::new(0));
        let source = CountingPages::new(vec![vec![1, 2], vec![3]], started);
        let mut pages = EagerPages::new(source);

        let mut seen = Vec::new();
        while let Some(page) = pages.next().await {
            seen.extend(page.unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(pages.is_done());
        assert!(pages.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_stops_further_fetches() {
        let started = Arc::new(AtomicUsize::new(0));
        let source = CountingPages::new(vec![vec![1], vec![2], vec![3]], started.clone());
        let mut pages = EagerPages::new(source);

        pages.next().await.unwrap().unwrap();
        pages.close();
        assert!(pages.next().await.is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(started.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_error_ends_sequence() {
        let started = Arc::new(AtomicUsize::new(0));
        let mut source = CountingPages::new(vec![vec![1], vec![2]], started);
        source.fail_at = Some(1);
        let mut pages = EagerPages::new(source);

        assert!(pages.next().await.unwrap().is_ok());
        assert!(matches!(
            pages.next().await,
            Some(Err(AppError::StravaApi(_)))
        ));
        assert!(pages.next().await.is_none());
    }
}
