//! Size, expiration and recency bookkeeping shared by the cache backends.
//!
//! The index mutex is the backend's structural lock. `reap` holds it for the
//! whole sweep and hands the victims to the backend's bulk removal, which must
//! then run with `no_lock = true`.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use lru::LruCache;
use tracing::debug;

use super::config::{IndexOptions, MAX_OBJECT_TTL};
use super::instrument::{observe_cache_event, observe_cache_size_change};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::index";

#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexObject {
    pub size: u64,
    pub expires_at: SystemTime,
}

pub(crate) struct IndexState {
    objects: LruCache<String, IndexObject>,
    bytes: u64,
}

impl IndexState {
    fn insert(&mut self, key: &str, object: IndexObject) {
        if let Some(previous) = self.objects.put(key.to_string(), object) {
            self.bytes = self.bytes.saturating_sub(previous.size);
        }
        self.bytes = self.bytes.saturating_add(object.size);
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.objects.pop(key) {
            Some(object) => {
                self.bytes = self.bytes.saturating_sub(object.size);
                true
            }
            None => false,
        }
    }

    fn pop_lru(&mut self) -> Option<String> {
        let (key, object) = self.objects.pop_lru()?;
        self.bytes = self.bytes.saturating_sub(object.size);
        Some(key)
    }

    fn objects(&self) -> u64 {
        self.objects.len() as u64
    }
}

/// Held structural lock of one [`CacheIndex`].
pub(crate) struct IndexGuard<'a> {
    index: &'a CacheIndex,
    state: MutexGuard<'a, IndexState>,
}

impl IndexGuard<'_> {
    pub fn update_object(&mut self, key: &str, size: u64, expires_at: SystemTime) {
        self.state.insert(key, IndexObject { size, expires_at });
        self.index.report(&self.state);
    }

    /// Moves the deadline of a tracked object. Returns false when untracked.
    pub fn update_expiration(&mut self, key: &str, expires_at: SystemTime) -> bool {
        match self.state.objects.peek_mut(key) {
            Some(object) => {
                object.expires_at = expires_at;
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.state.objects.clear();
        self.state.bytes = 0;
        self.index.report(&self.state);
    }

    pub fn remove_objects(&mut self, keys: &[String]) {
        let mut changed = false;
        for key in keys {
            changed |= self.state.remove(key);
        }
        if changed {
            self.index.report(&self.state);
        }
    }
}

/// Deadline `ttl` after `now`, clamped to [`MAX_OBJECT_TTL`].
pub(crate) fn deadline_after(now: SystemTime, ttl: Duration) -> SystemTime {
    now.checked_add(ttl.min(MAX_OBJECT_TTL)).unwrap_or(now)
}

/// Index over one backend's stored objects.
pub(crate) struct CacheIndex {
    cache_name: String,
    cache_type: &'static str,
    options: IndexOptions,
    state: Mutex<IndexState>,
}

impl CacheIndex {
    pub fn new(cache_name: &str, cache_type: &'static str, options: IndexOptions) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            cache_type,
            options,
            state: Mutex::new(IndexState {
                objects: LruCache::unbounded(),
                bytes: 0,
            }),
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, IndexState> {
        mutex_lock(&self.state, SOURCE, op)
    }

    fn report(&self, state: &IndexState) {
        observe_cache_size_change(
            &self.cache_name,
            self.cache_type,
            state.bytes,
            state.objects(),
        );
    }

    /// Takes the structural lock.
    ///
    /// Backends hold the returned guard across the payload change so storage
    /// and index move together.
    pub fn locked(&self, op: &'static str) -> IndexGuard<'_> {
        IndexGuard {
            index: self,
            state: self.lock(op),
        }
    }

    /// Records a newly written object, replacing any previous record for `key`.
    pub fn update_object(&self, key: &str, size: u64, expires_at: SystemTime) {
        self.locked("update_object")
            .update_object(key, size, expires_at);
    }

    /// Marks `key` as most recently used.
    pub fn touch(&self, key: &str) {
        self.lock("touch").objects.promote(key);
    }

    /// Whether `key` is tracked, without changing its recency.
    #[cfg(test)]
    pub fn tracks(&self, key: &str) -> bool {
        self.lock("tracks").objects.contains(key)
    }

    /// Current `(bytes, objects)` totals.
    pub fn totals(&self) -> (u64, u64) {
        let state = self.lock("totals");
        (state.bytes, state.objects())
    }

    /// Evicts expired objects, then least recently used objects while the
    /// configured byte or object limits are exceeded.
    ///
    /// `remove` runs with the structural lock held and must not re-acquire it.
    /// Returns the number of evicted keys.
    pub fn reap<F>(&self, now: SystemTime, remove: F) -> usize
    where
        F: FnOnce(&[String]),
    {
        let mut state = self.lock("reap");
        let mut victims: Vec<String> = state
            .objects
            .iter()
            .filter(|(_, object)| object.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &victims {
            state.remove(key);
        }
        let expired = victims.len();

        let mut evicted_bytes = 0;
        if let Some(target) = self.options.bytes_target() {
            if state.bytes > self.options.max_size_bytes {
                while state.bytes > target {
                    let Some(key) = state.pop_lru() else { break };
                    victims.push(key);
                    evicted_bytes += 1;
                }
            }
        }

        let mut evicted_objects = 0;
        if let Some(target) = self.options.objects_target() {
            if state.objects() > self.options.max_size_objects {
                while state.objects() > target {
                    let Some(key) = state.pop_lru() else { break };
                    victims.push(key);
                    evicted_objects += 1;
                }
            }
        }

        if victims.is_empty() {
            return 0;
        }

        remove(&victims);

        for (reason, count) in [
            ("ttl", expired),
            ("size_bytes", evicted_bytes),
            ("size_objects", evicted_objects),
        ] {
            for _ in 0..count {
                observe_cache_event(&self.cache_name, self.cache_type, "eviction", reason);
            }
        }
        self.report(&state);

        debug!(
            cache_name = %self.cache_name,
            cache_type = self.cache_type,
            expired,
            evicted_bytes,
            evicted_objects,
            bytes = state.bytes,
            objects = state.objects(),
            "cache reap completed"
        );

        victims.len()
    }
}
