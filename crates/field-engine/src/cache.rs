// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Expiring key/value cache with a durable write-through mirror.
//!
//! Entries expire lazily on read and are also swept periodically by a
//! background task (see [`ExpiringCache::spawn_sweeper`]). Every write is
//! mirrored to a [`DurableStore`]; mirror failures are logged and ignored.
//! On an in-memory miss a still-fresh mirror record is restored.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::store::DurableStore;

// Keeps `expire_at > created_at` for zero TTLs
const MIN_TTL: Duration = Duration::from_millis(1);

struct Entry<V> {
    value: V,
    created_at: Instant,
    expire_at: Instant,
}

/// Snapshot of a live cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: Instant,
    pub expire_at: Instant,
    /// Name of the cache that owns the entry (usually a field kind).
    pub kind: String,
}

#[derive(Serialize, Deserialize)]
struct MirrorRecord<V> {
    value: V,
    created_at_ms: i64,
    expire_at_ms: i64,
}

// Expiry stamp of a mirror record, read without decoding the value
#[derive(Deserialize)]
struct MirrorStamp {
    expire_at_ms: i64,
}

/// Generic TTL cache. TTLs are chosen per write by the caller.
pub struct ExpiringCache<V> {
    kind: String,
    entries: Mutex<HashMap<String, Entry<V>>>,
    store: Arc<dyn DurableStore>,
}

impl<V> std::fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("kind", &self.kind)
            .field("entries", &self.lock().len())
            .field("store", &self.store)
            .finish()
    }
}

impl<V> ExpiringCache<V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> ExpiringCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    #[must_use]
    pub fn new(kind: impl Into<String>, store: Arc<dyn DurableStore>) -> Self {
        Self {
            kind: kind.into(),
            entries: Mutex::new(HashMap::new()),
            store,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Store `value` under `key` for `ttl` and mirror it to the durable store.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let ttl = ttl.max(MIN_TTL);
        let created_at = Instant::now();
        self.mirror_write(key, &value, ttl);
        self.lock().insert(
            key.to_string(),
            Entry {
                value,
                created_at,
                expire_at: created_at + ttl,
            },
        );
    }

    /// Value for `key`, or `None` if absent or expired.
    ///
    /// An expired entry is deleted as a side effect.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let lookup = self
            .lock()
            .get(key)
            .map(|entry| (now < entry.expire_at).then(|| entry.value.clone()));

        match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                debug!("{} cache entry expired: {}", self.kind, key);
                self.delete(key);
                None
            }
            None => self.restore_from_mirror(key),
        }
    }

    /// Whether a live entry exists for `key` in memory.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock().get(key).is_some_and(|entry| now < entry.expire_at)
    }

    /// Snapshot of the live entry for `key`, without touching the mirror.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|entry| now < entry.expire_at)
            .map(|entry| CacheEntry {
                key: key.to_string(),
                value: entry.value.clone(),
                created_at: entry.created_at,
                expire_at: entry.expire_at,
                kind: self.kind.clone(),
            })
    }

    /// Remove `key` from memory and from the mirror.
    pub fn delete(&self, key: &str) {
        self.lock().remove(key);
        self.mirror_remove(key);
    }

    /// Remove every in-memory entry and its mirror record.
    pub fn clear(&self) {
        let keys: Vec<String> = self.lock().drain().map(|(key, _)| key).collect();
        for key in &keys {
            self.mirror_remove(key);
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut entries = self.lock();
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| now >= entry.expire_at)
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        for key in &expired {
            self.mirror_remove(key);
        }
        let orphaned = self.purge_expired_mirror();
        if !expired.is_empty() || orphaned > 0 {
            debug!(
                "{} cache swept {} expired entries and {} mirror records",
                self.kind,
                expired.len(),
                orphaned
            );
        }
        expired.len() + orphaned
    }

    /// Drop expired mirror records whose keys are no longer held in memory,
    /// such as those left by an earlier session.
    fn purge_expired_mirror(&self) -> usize {
        let now_ms = Utc::now().timestamp_millis();
        let mut keep = |json: &str| {
            serde_json::from_str::<MirrorStamp>(json).map_or(true, |stamp| stamp.expire_at_ms > now_ms)
        };
        match self.store.retain_items(&mut keep) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("{} cache mirror sweep failed: {}", self.kind, e);
                0
            }
        }
    }

    /// Number of entries physically present, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a task that calls [`cleanup_expired`](Self::cleanup_expired)
    /// every `interval` until `cancel` fires or the cache is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        V: Sync,
    {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_TTL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = cancel.cancelled() => return,
                }
                let Some(cache) = cache.upgrade() else {
                    return;
                };
                cache.cleanup_expired();
            }
        })
    }

    fn mirror_write(&self, key: &str, value: &V, ttl: Duration) {
        let created_at_ms = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let record = MirrorRecord {
            value,
            created_at_ms,
            expire_at_ms: created_at_ms.saturating_add(ttl_ms),
        };

        let result = serde_json::to_string(&record)
            .map_err(crate::store::StoreError::from)
            .and_then(|json| self.store.set_item(key, &json));
        if let Err(e) = result {
            warn!("{} cache mirror write failed for {}: {}", self.kind, key, e);
        }
    }

    fn mirror_remove(&self, key: &str) {
        if let Err(e) = self.store.remove_item(key) {
            warn!("{} cache mirror remove failed for {}: {}", self.kind, key, e);
        }
    }

    fn restore_from_mirror(&self, key: &str) -> Option<V> {
        let json = match self.store.get_item(key) {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                warn!("{} cache mirror read failed for {}: {}", self.kind, key, e);
                return None;
            }
        };

        let record: MirrorRecord<V> = match serde_json::from_str(&json) {
            Ok(record) => record,
            Err(e) => {
                warn!("{} cache mirror record for {} is unreadable: {}", self.kind, key, e);
                self.mirror_remove(key);
                return None;
            }
        };

        let remaining_ms = record.expire_at_ms - Utc::now().timestamp_millis();
        let Ok(remaining_ms) = u64::try_from(remaining_ms) else {
            self.mirror_remove(key);
            return None;
        };
        if remaining_ms == 0 {
            self.mirror_remove(key);
            return None;
        }

        debug!("{} cache restored {} from mirror", self.kind, key);
        let created_at = Instant::now();
        self.lock().insert(
            key.to_string(),
            Entry {
                value: record.value.clone(),
                created_at,
                expire_at: created_at + Duration::from_millis(remaining_ms),
            },
        );
        Some(record.value)
    }
}
