//! Idempotency cache
//!
//! Keyed single-flight memo of `(idempotency key, body hash) → Resolution`.
//!
//! - The first caller for a key spawns the computation and parks a shared
//!   handle to it in the map. Later callers for the same key await that
//!   handle instead of computing again, so exactly one computation runs per
//!   key and everyone gets the same `Resolution` (same `audit_id`).
//! - Successful results are kept until `expires_at` and served as hits.
//! - Failed results are handed to everyone waiting at the time, then the
//!   slot is cleared so the next request retries.
//! - Expired records are evicted on lookup and by [`IdempotencyCache::spawn_sweeper`].
//!
//! The computation runs on its own task and settles its own slot, so a
//! client disconnecting neither cancels work other callers are waiting on
//! nor leaves a stale failure behind for the next retry.

use crate::error::ImputeError;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use rimp_common::Resolution;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub type ComputeResult = Result<Resolution, ImputeError>;

type SharedCompute = Shared<BoxFuture<'static, ComputeResult>>;

/// Cache identity: same key with a different body is a different entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub idempotency_key: String,
    pub body_hash: String,
}

impl CacheKey {
    pub fn new(idempotency_key: impl Into<String>, body_hash: impl Into<String>) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            body_hash: body_hash.into(),
        }
    }
}

/// Stored result of a completed computation
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: CacheKey,
    pub resolution: Resolution,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// How a request was served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    /// Stored record returned
    Hit,
    /// Waited on another request's computation
    Joined,
    /// This request ran the computation
    Computed,
    /// No idempotency key; cache not consulted
    Bypass,
}

enum Slot {
    Ready(IdempotencyRecord),
    InFlight { generation: u64, future: SharedCompute },
}

type Slots = Mutex<HashMap<CacheKey, Slot>>;

pub struct IdempotencyCache {
    slots: Arc<Slots>,
    ttl: chrono::Duration,
    next_generation: AtomicU64,
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<CacheKey, Slot>> {
    // Slot updates are single inserts/removes, so a poisoned map is
    // still consistent
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            next_generation: AtomicU64::new(1),
        }
    }

    /// Return the stored resolution for `key`, or compute it exactly once
    ///
    /// `compute` is only invoked when no live record and no in-flight
    /// computation exists for `key`.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> (ComputeResult, CacheStatus)
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = ComputeResult> + Send + 'static,
    {
        let (future, status) = {
            let mut slots = lock(&self.slots);
            let now = Utc::now();

            match slots.get(&key) {
                Some(Slot::Ready(record)) if !record.is_expired(now) => {
                    debug!(key = %key.idempotency_key, "Idempotency hit");
                    return (Ok(record.resolution.clone()), CacheStatus::Hit);
                }
                // Join only while running; a finished future still parked
                // here lost its task before settling and counts as vacant
                Some(Slot::InFlight { future, .. }) if future.peek().is_none() => {
                    debug!(key = %key.idempotency_key, "Joining in-flight computation");
                    (future.clone(), CacheStatus::Joined)
                }
                _ => {
                    if slots.remove(&key).is_some() {
                        debug!(key = %key.idempotency_key, "Stale slot evicted on lookup");
                    }
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let future = self.spawn_compute(key.clone(), generation, compute());
                    slots.insert(
                        key,
                        Slot::InFlight {
                            generation,
                            future: future.clone(),
                        },
                    );
                    (future, CacheStatus::Computed)
                }
            }
        };

        (future.await, status)
    }

    /// Run `compute` on its own task, which settles the slot when done
    ///
    /// Settling does not depend on any caller still waiting, so a request
    /// dropped mid-flight cannot leave a finished failure in the map.
    fn spawn_compute<Fut>(&self, key: CacheKey, generation: u64, compute: Fut) -> SharedCompute
    where
        Fut: Future<Output = ComputeResult> + Send + 'static,
    {
        let slots = Arc::clone(&self.slots);
        let ttl = self.ttl;
        let handle = tokio::spawn(async move {
            let result = match AssertUnwindSafe(compute).catch_unwind().await {
                Ok(result) => result,
                Err(_) => {
                    warn!(key = %key.idempotency_key, "Idempotent computation panicked");
                    Err(ImputeError::Internal("computation panicked".to_string()))
                }
            };
            settle(&slots, &key, generation, ttl, &result);
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "Idempotent computation task failed");
                    Err(ImputeError::Internal(e.to_string()))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Stored record for `key`, if live
    pub fn get(&self, key: &CacheKey) -> Option<IdempotencyRecord> {
        match lock(&self.slots).get(key) {
            Some(Slot::Ready(record)) if !record.is_expired(Utc::now()) => Some(record.clone()),
            _ => None,
        }
    }

    /// Drop expired records and abandoned computations; returns the
    /// number of slots evicted
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Ready(record) => !record.is_expired(now),
            Slot::InFlight { future, .. } => future.peek().is_none(),
        });
        before - slots.len()
    }

    /// Records and in-flight computations currently held
    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.slots).is_empty()
    }

    /// Periodically evict expired records until `shutdown` fires
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Idempotency sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = self.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, remaining = self.len(), "Idempotency sweep");
                        }
                    }
                }
            }
        })
    }
}

/// Replace an in-flight slot with its outcome, if it is still ours
///
/// Records are stamped at completion, so the TTL runs from when the
/// resolution was produced.
fn settle(
    slots: &Slots,
    key: &CacheKey,
    generation: u64,
    ttl: chrono::Duration,
    result: &ComputeResult,
) {
    let mut slots = lock(slots);
    let ours = matches!(
        slots.get(key),
        Some(Slot::InFlight { generation: g, .. }) if *g == generation
    );
    if !ours {
        return;
    }

    match result {
        Ok(resolution) => {
            let created_at = Utc::now();
            let record = IdempotencyRecord {
                key: key.clone(),
                resolution: resolution.clone(),
                created_at,
                expires_at: created_at + ttl,
            };
            slots.insert(key.clone(), Slot::Ready(record));
        }
        Err(_) => {
            slots.remove(key);
        }
    }
}
