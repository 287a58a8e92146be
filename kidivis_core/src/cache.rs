//! Shared render cache.
//!
//! Entries are keyed by [`RenderKey`] and never evicted. Concurrent requests
//! for the same key share one render: the first caller leads, later callers
//! block until the leader publishes. Failed renders are handed to the callers
//! waiting on that attempt but never stored, so a later request retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use serde::Serialize;

use crate::invoker::{RenderKey, RenderResult};
use crate::{Error, Result};

/// Counters describing cache activity since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests answered from a stored entry.
    pub hits: u64,
    /// Requests that found no entry and led a render.
    pub misses: u64,
    /// Render closures actually executed.
    pub renders: u64,
    /// Requests that waited on another caller's in-flight render.
    pub waits: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    renders: AtomicU64,
    waits: AtomicU64,
}

enum Slot {
    Ready(Arc<RenderResult>),
    Pending(Arc<Pending>),
}

#[derive(Clone)]
enum Outcome {
    Finished(Arc<RenderResult>),
    Abandoned,
}

#[derive(Default)]
struct Pending {
    outcome: Mutex<Option<Outcome>>,
    ready: Condvar,
}

impl Pending {
    fn publish(&self, outcome: Outcome) {
        let mut slot = self
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self) -> Result<Outcome> {
        let guard = self
            .outcome
            .lock()
            .map_err(|_| Error::Internal("render cache wait lock poisoned"))?;
        let guard = self
            .ready
            .wait_while(guard, |outcome| outcome.is_none())
            .map_err(|_| Error::Internal("render cache wait lock poisoned"))?;
        guard
            .clone()
            .ok_or(Error::Internal("render cache woke without an outcome"))
    }
}

/// Content-addressed store of render results.
#[derive(Default)]
pub struct RenderCache {
    slots: Mutex<HashMap<RenderKey, Slot>>,
    counters: Counters,
}

impl RenderCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored result for `key`, if one has been published.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when the cache lock is poisoned.
    pub fn get(&self, key: &RenderKey) -> Result<Option<Arc<RenderResult>>> {
        let slots = self.lock()?;
        Ok(match slots.get(key) {
            Some(Slot::Ready(result)) => Some(Arc::clone(result)),
            Some(Slot::Pending(_)) | None => None,
        })
    }

    /// Store a result under `key` and return the stored entry. Storing a
    /// raster equal to the existing one is a no-op; failed results are
    /// returned without being stored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheKeyConflict`] when `key` already holds a
    /// different raster.
    pub fn put(&self, key: RenderKey, result: RenderResult) -> Result<Arc<RenderResult>> {
        let result = Arc::new(result);
        let mut slots = self.lock()?;
        store(&mut slots, key, &result, None)
    }

    /// Return the cached result for `key`, running `render` at most once
    /// across all concurrent callers when it is missing.
    ///
    /// If the leading caller panics inside `render`, its slot is released and
    /// one of the waiters takes over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CacheKeyConflict`] when a concurrent [`put`] stored a
    /// different raster, or [`Error::Internal`] on lock poisoning.
    ///
    /// [`put`]: Self::put
    pub fn get_or_render<F>(&self, key: &RenderKey, render: F) -> Result<Arc<RenderResult>>
    where
        F: FnOnce() -> RenderResult,
    {
        let mut render = Some(render);
        loop {
            let pending = {
                let mut slots = self.lock()?;
                match slots.get(key) {
                    Some(Slot::Ready(result)) => {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(%key, "render cache hit");
                        return Ok(Arc::clone(result));
                    }
                    Some(Slot::Pending(pending)) => Arc::clone(pending),
                    None => {
                        let pending = Arc::new(Pending::default());
                        slots.insert(key.clone(), Slot::Pending(Arc::clone(&pending)));
                        drop(slots);
                        self.counters.misses.fetch_add(1, Ordering::Relaxed);
                        let render = render
                            .take()
                            .ok_or(Error::Internal("render closure consumed twice"))?;
                        return self.lead(key, pending, render);
                    }
                }
            };

            self.counters.waits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%key, "waiting on in-flight render");
            match pending.wait()? {
                Outcome::Finished(result) => return Ok(result),
                Outcome::Abandoned => {
                    tracing::debug!(%key, "in-flight render abandoned, retrying");
                }
            }
        }
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            renders: self.counters.renders.load(Ordering::Relaxed),
            waits: self.counters.waits.load(Ordering::Relaxed),
        }
    }

    /// Number of stored results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .map(|slots| {
                slots
                    .values()
                    .filter(|slot| matches!(slot, Slot::Ready(_)))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether no result has been stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lead<F>(&self, key: &RenderKey, pending: Arc<Pending>, render: F) -> Result<Arc<RenderResult>>
    where
        F: FnOnce() -> RenderResult,
    {
        let mut guard = SlotGuard {
            cache: self,
            key,
            pending: Some(pending),
        };
        let result = Arc::new(render());
        self.counters.renders.fetch_add(1, Ordering::Relaxed);
        guard.complete(result)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RenderKey, Slot>>> {
        self.slots
            .lock()
            .map_err(|_| Error::Internal("render cache lock poisoned"))
    }
}

impl std::fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCache")
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Store `result` under `key`, replacing `owner`'s pending slot if it is
/// still the one in the map.
fn store(
    slots: &mut HashMap<RenderKey, Slot>,
    key: RenderKey,
    result: &Arc<RenderResult>,
    owner: Option<&Arc<Pending>>,
) -> Result<Arc<RenderResult>> {
    match slots.get(&key) {
        Some(Slot::Ready(existing)) => {
            if result.is_failed() || existing.raster == result.raster {
                return Ok(Arc::clone(existing));
            }
            Err(Error::CacheKeyConflict {
                key: key.to_string(),
            })
        }
        Some(Slot::Pending(pending)) if owner.is_some_and(|owner| Arc::ptr_eq(owner, pending)) => {
            if result.is_failed() {
                slots.remove(&key);
            } else {
                slots.insert(key, Slot::Ready(Arc::clone(result)));
            }
            Ok(Arc::clone(result))
        }
        Some(Slot::Pending(_)) | None => {
            if !result.is_failed() {
                slots.insert(key, Slot::Ready(Arc::clone(result)));
            }
            Ok(Arc::clone(result))
        }
    }
}

/// Owns a pending slot while its render runs. Dropping an uncompleted guard
/// removes the slot and wakes waiters so one of them can retry.
struct SlotGuard<'a> {
    cache: &'a RenderCache,
    key: &'a RenderKey,
    pending: Option<Arc<Pending>>,
}

impl SlotGuard<'_> {
    fn complete(&mut self, result: Arc<RenderResult>) -> Result<Arc<RenderResult>> {
        let pending = self
            .pending
            .take()
            .ok_or(Error::Internal("render slot completed twice"))?;
        let stored = match self.cache.lock() {
            Ok(mut slots) => store(&mut slots, self.key.clone(), &result, Some(&pending)),
            Err(err) => Err(err),
        };
        pending.publish(Outcome::Finished(Arc::clone(&result)));
        stored
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let mut slots = self
            .cache
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if matches!(slots.get(self.key), Some(Slot::Pending(current)) if Arc::ptr_eq(current, &pending))
        {
            slots.remove(self.key);
        }
        drop(slots);
        tracing::warn!(key = %self.key, "render abandoned");
        pending.publish(Outcome::Abandoned);
    }
}
