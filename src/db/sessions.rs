// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! File-backed session credential store.
//!
//! One JSON file per session under the sessions directory. Every read and
//! every read-modify-write happens while holding `<session>.json.lock`, an
//! exclusively created lock file, so overlapping requests and other server
//! processes sharing the directory never clobber each other's updates.
//! Callers in this process first queue on a per-session mutex, so the lock
//! file is only contended between processes.

use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Credential, SessionId};

/// Delay between lock attempts.
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A lock file older than this belongs to a holder that died.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(10);

type LocalLocks = Arc<DashMap<SessionId, Arc<Mutex<()>>>>;

/// Session credential store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
    lock_retries: u32,
    local_locks: LocalLocks,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>, lock_retries: u32) -> Self {
        Self {
            dir: dir.into(),
            lock_retries,
            local_locks: Arc::new(DashMap::new()),
        }
    }

    /// Create the sessions directory if needed.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::SessionStore(format!("{}: {}", self.dir.display(), e)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a consistent snapshot of the session's credential.
    ///
    /// A missing or unreadable file is an empty credential.
    pub async fn read(&self, session: &SessionId) -> Result<Credential> {
        let _lock = self.lock(session).await?;
        Ok(load(&self.credential_path(session)).await)
    }

    /// Atomically apply `mutate` to the current credential and persist it.
    ///
    /// Returns the credential as written.
    pub async fn update<F>(&self, session: &SessionId, mutate: F) -> Result<Credential>
    where
        F: FnOnce(&mut Credential),
    {
        let _lock = self.lock(session).await?;
        let path = self.credential_path(session);

        // Re-read under the lock; another process may have written since our last read.
        let mut credential = load(&path).await;
        mutate(&mut credential);

        let json = serde_json::to_vec(&credential)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode credential: {}", e)))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AppError::SessionStore(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AppError::SessionStore(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(session = %session, "Session credential updated");
        Ok(credential)
    }

    fn credential_path(&self, session: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json", session))
    }

    fn lock_path(&self, session: &SessionId) -> PathBuf {
        self.dir.join(format!("{}.json.lock", session))
    }

    async fn lock(&self, session: &SessionId) -> Result<SessionLock> {
        let local = self
            .local_locks
            .entry(session.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let local = LocalLock {
            session: session.clone(),
            locks: Arc::clone(&self.local_locks),
            guard: Some(local.lock_owned().await),
        };
        let path = self.lock_path(session);

        for attempt in 0..=self.lock_retries {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => {
                    return Ok(SessionLock {
                        path,
                        _local: local,
                    })
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(&path).await {
                        break_stale_lock(&path).await;
                        continue;
                    }
                    tracing::debug!(attempt, path = %path.display(), "Session lock busy");
                    tokio::time::sleep(LOCK_RETRY_DELAY).await;
                }
                Err(e) => {
                    return Err(AppError::LockAcquisition(format!(
                        "{}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        Err(AppError::LockAcquisition(format!(
            "{}: still held after {} retries",
            path.display(),
            self.lock_retries
        )))
    }
}

/// Held lock on a session file; released on drop.
#[derive(Debug)]
struct SessionLock {
    path: PathBuf,
    /// Released after the lock file is removed
    _local: LocalLock,
}

/// In-process turn on a session. The map entry is dropped with the last user.
#[derive(Debug)]
struct LocalLock {
    session: SessionId,
    locks: LocalLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LocalLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.session, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(error = %e, path = %self.path.display(), "Failed to release session lock");
        }
    }
}

async fn is_stale(lock: &Path) -> bool {
    let Ok(metadata) = tokio::fs::metadata(lock).await else {
        return false;
    };
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > LOCK_STALE_AFTER)
}

/// Move a stale lock aside and delete it.
///
/// Of several processes breaking the same lock only one rename succeeds. If
/// the moved file turns out to be fresh, its holder took the lock after our
/// staleness check and the file is linked back.
async fn break_stale_lock(path: &Path) {
    let aside = path.with_extension(format!("lock.{}", Uuid::new_v4()));
    if let Err(e) = tokio::fs::rename(path, &aside).await {
        tracing::debug!(error = %e, path = %path.display(), "Stale session lock already broken");
        return;
    }

    if is_stale(&aside).await {
        tracing::warn!(path = %path.display(), "Removed stale session lock");
    } else if let Err(e) = tokio::fs::hard_link(&aside, path).await {
        tracing::warn!(error = %e, path = %path.display(), "Failed to restore live session lock");
    }

    if let Err(e) = tokio::fs::remove_file(&aside).await {
        tracing::warn!(error = %e, path = %aside.display(), "Failed to remove broken session lock");
    }
}

async fn load(path: &Path) -> Credential {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Credential::default(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "Unreadable session file, treating as empty");
            return Credential::default();
        }
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        tracing::warn!(error = %e, path = %path.display(), "Corrupt session file, treating as empty");
        Credential::default()
    })
}
