// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Ordering primitives for batches of concurrent fetches.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Runs the "finish" phase of successive calls strictly in call order.
///
/// Each call supplies a setup future that resolves to a finish future.
/// Setups run concurrently; finish N starts only after finish N-1 has
/// completed, failed or been dropped.
#[derive(Debug, Default)]
pub struct InOrder {
    last: Mutex<Option<oneshot::Receiver<()>>>,
}

impl InOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a call. Its position is fixed here, not when the future is first polled.
    pub fn run<S, F, T>(&self, setup: S) -> impl Future<Output = T> + Send
    where
        S: Future<Output = F> + Send,
        F: Future<Output = T> + Send,
        T: Send,
    {
        let (done, turn) = oneshot::channel::<()>();
        let previous = self
            .last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(turn);

        async move {
            let finish = setup.await;
            if let Some(previous) = previous {
                // A closed channel means the previous call was dropped; its turn is over.
                let _ = previous.await;
            }
            let output = finish.await;
            let _ = done.send(());
            output
        }
    }
}

/// Spawn `futures` and return one receiver per future, filled in completion order.
///
/// Receiver 0 gets whichever value finishes first, receiver 1 the second, and
/// so on. If a future panics, the last receiver is closed instead.
pub fn sort_by_completion<I, F, T>(futures: I) -> Vec<oneshot::Receiver<T>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let futures: Vec<F> = futures.into_iter().collect();
    let (senders, receivers): (VecDeque<_>, Vec<_>) =
        (0..futures.len()).map(|_| oneshot::channel()).unzip();
    let slots = Arc::new(Mutex::new(senders));

    for future in futures {
        let slots = Arc::clone(&slots);
        tokio::spawn(async move {
            let value = future.await;
            let slot = slots
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            if let Some(slot) = slot {
                let _ = slot.send(value);
            }
        });
    }

    receivers
}
