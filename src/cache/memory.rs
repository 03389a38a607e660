//! In-process cache engine.
//!
//! Payloads live in a sharded concurrent map; whole entries are swapped on
//! write so readers never observe a partial entry. Size and recency are kept
//! by the index, whose lock is this engine's structural lock: every change to
//! the map happens while it is held.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::info;

use super::config::CacheConfig;
use super::error::CacheError;
use super::index::{CacheIndex, deadline_after};
use super::instrument::{
    observe_cache_closed, observe_cache_del, observe_cache_expired, observe_cache_miss,
    observe_cache_operation,
};
use super::status::LookupStatus;
use super::{Cache, MemoryCache, ReferenceObject};

const CACHE_TYPE: &str = "memory";

#[derive(Clone)]
enum Payload {
    Bytes(Bytes),
    Reference(Arc<dyn ReferenceObject>),
}

#[derive(Clone)]
struct Entry {
    payload: Payload,
    expires_at: SystemTime,
}

/// Cache engine holding entries in process memory.
pub struct InMemoryCache {
    config: CacheConfig,
    entries: DashMap<String, Entry>,
    index: CacheIndex,
    open: AtomicBool,
}

impl InMemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        let index = CacheIndex::new(&config.name, CACHE_TYPE, config.index.clone());
        Self {
            config,
            entries: DashMap::new(),
            index,
            open: AtomicBool::new(false),
        }
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(observe_cache_closed(self.name(), CACHE_TYPE))
        }
    }

    fn insert(
        &self,
        key: &str,
        payload: Payload,
        size: u64,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = deadline_after(SystemTime::now(), ttl);
        let mut index = self.index.locked("store");
        // Checked under the lock so a racing close cannot be undone.
        self.ensure_open()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                payload,
                expires_at,
            },
        );
        index.update_object(key, size, expires_at);
        drop(index);
        observe_cache_operation(self.name(), CACHE_TYPE, "set", "success", size);
        Ok(())
    }

    /// Looks `key` up and applies the deadline policy shared by both payload kinds.
    fn lookup(&self, key: &str, allow_expired: bool) -> Result<(Entry, LookupStatus), CacheError> {
        self.ensure_open()?;
        // Clone out of the map so the shard guard is released before the index lock.
        let entry = match self.entries.get(key) {
            Some(entry) => entry.value().clone(),
            None => return Err(observe_cache_miss(key, self.name(), CACHE_TYPE)),
        };

        let status = if entry.expires_at > SystemTime::now() {
            LookupStatus::Hit
        } else if allow_expired {
            LookupStatus::ExpiredHit
        } else {
            return Err(observe_cache_expired(key, self.name(), CACHE_TYPE));
        };

        self.index.touch(key);
        Ok((entry, status))
    }

    /// Current `(bytes, objects)` totals as tracked by the index.
    pub fn usage(&self) -> (u64, u64) {
        self.index.totals()
    }
}

impl Cache for InMemoryCache {
    fn connect(&self) -> Result<(), CacheError> {
        info!(
            cache_name = %self.config.name,
            cache_type = CACHE_TYPE,
            "memory cache setup"
        );
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn store(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let size = (key.len() + data.len()) as u64;
        self.insert(key, Payload::Bytes(data), size, ttl)
    }

    fn retrieve(&self, key: &str, allow_expired: bool) -> Result<(Bytes, LookupStatus), CacheError> {
        let (entry, status) = self.lookup(key, allow_expired)?;
        match entry.payload {
            Payload::Bytes(data) => {
                observe_cache_operation(
                    self.name(),
                    CACHE_TYPE,
                    "get",
                    status.as_str(),
                    data.len() as u64,
                );
                Ok((data, status))
            }
            Payload::Reference(_) => Err(observe_cache_miss(key, self.name(), CACHE_TYPE)),
        }
    }

    fn set_ttl(&self, key: &str, ttl: Duration) {
        if self.ensure_open().is_err() {
            return;
        }
        let expires_at = deadline_after(SystemTime::now(), ttl);
        let mut index = self.index.locked("set_ttl");
        let updated = match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = expires_at;
                true
            }
            None => false,
        };
        if updated {
            index.update_expiration(key, expires_at);
            drop(index);
            observe_cache_operation(self.name(), CACHE_TYPE, "update-ttl", "success", 0);
        }
    }

    fn remove(&self, key: &str) {
        self.bulk_remove(&[key.to_string()], false);
    }

    fn bulk_remove(&self, keys: &[String], no_lock: bool) {
        if self.ensure_open().is_err() {
            return;
        }
        let remove_entries = || {
            keys.iter()
                .filter(|key| self.entries.remove(key.as_str()).is_some())
                .count()
        };
        let removed = if no_lock {
            remove_entries()
        } else {
            let mut index = self.index.locked("bulk_remove");
            let removed = remove_entries();
            index.remove_objects(keys);
            removed
        };
        observe_cache_del(self.name(), CACHE_TYPE, removed as u64);
    }

    fn close(&self) -> Result<(), CacheError> {
        self.open.store(false, Ordering::Release);
        let mut index = self.index.locked("close");
        self.entries.clear();
        index.clear();
        drop(index);
        info!(
            cache_name = %self.config.name,
            cache_type = CACHE_TYPE,
            "memory cache closed"
        );
        Ok(())
    }

    fn configuration(&self) -> &CacheConfig {
        &self.config
    }

    fn as_memory_cache(&self) -> Option<&dyn MemoryCache> {
        Some(self)
    }

    fn reap(&self) {
        if !self.open.load(Ordering::Acquire) {
            return;
        }
        self.index
            .reap(SystemTime::now(), |victims| self.bulk_remove(victims, true));
    }
}

impl MemoryCache for InMemoryCache {
    fn store_reference(
        &self,
        key: &str,
        object: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let size = (key.len() + object.approximate_size()) as u64;
        self.insert(key, Payload::Reference(object), size, ttl)
    }

    fn retrieve_reference(
        &self,
        key: &str,
        allow_expired: bool,
    ) -> Result<(Arc<dyn ReferenceObject>, LookupStatus), CacheError> {
        let (entry, status) = self.lookup(key, allow_expired)?;
        match entry.payload {
            Payload::Reference(object) => {
                observe_cache_operation(self.name(), CACHE_TYPE, "getref", status.as_str(), 0);
                Ok((object, status))
            }
            Payload::Bytes(_) => Err(observe_cache_miss(key, self.name(), CACHE_TYPE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::cache::config::IndexOptions;

    struct Series {
        points: Vec<u64>,
    }

    impl ReferenceObject for Series {
        fn approximate_size(&self) -> usize {
            self.points.len() * std::mem::size_of::<u64>()
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn connected(config: CacheConfig) -> InMemoryCache {
        let cache = InMemoryCache::new(config);
        cache.connect().expect("memory cache connects");
        cache
    }

    fn cache() -> InMemoryCache {
        connected(CacheConfig::memory("test"))
    }

    #[test]
    fn never_stored_key_is_a_miss() {
        let cache = cache();
        let err = cache.retrieve("absent", false).expect_err("absent key");
        assert!(err.is_not_found());
        assert_eq!(err.status(), LookupStatus::Miss);
    }

    #[test]
    fn stored_value_is_a_hit() {
        let cache = cache();
        cache
            .store("k", Bytes::from_static(b"payload"), Duration::from_secs(60))
            .expect("store");

        let (data, status) = cache.retrieve("k", false).expect("hit");
        assert_eq!(data, Bytes::from_static(b"payload"));
        assert_eq!(status, LookupStatus::Hit);
    }

    #[test]
    fn store_overwrites_existing_entry() {
        let cache = cache();
        cache
            .store("k", Bytes::from_static(b"one"), Duration::from_secs(60))
            .expect("store");
        cache
            .store("k", Bytes::from_static(b"two"), Duration::from_secs(60))
            .expect("store");

        let (data, _) = cache.retrieve("k", false).expect("hit");
        assert_eq!(data, Bytes::from_static(b"two"));
        assert_eq!(cache.usage(), (4, 1));
    }

    #[test]
    fn expired_entry_needs_allow_expired() {
        let cache = cache();
        cache
            .store("k", Bytes::from_static(b"stale"), Duration::from_millis(5))
            .expect("store");
        thread::sleep(Duration::from_millis(20));

        let err = cache.retrieve("k", false).expect_err("expired");
        assert!(err.is_not_found());
        assert_eq!(err.status(), LookupStatus::Expired);

        let (data, status) = cache.retrieve("k", true).expect("stale read");
        assert_eq!(data, Bytes::from_static(b"stale"));
        assert_eq!(status, LookupStatus::ExpiredHit);

        // Serving stale data does not refresh the deadline.
        assert!(cache.retrieve("k", false).is_err());
    }

    #[test]
    fn set_ttl_extends_without_touching_payload() {
        let cache = cache();
        cache.set_ttl("absent", Duration::from_secs(60));
        assert!(cache.retrieve("absent", false).is_err());

        cache
            .store("k", Bytes::from_static(b"data"), Duration::from_millis(5))
            .expect("store");
        cache.set_ttl("k", Duration::from_secs(60));
        thread::sleep(Duration::from_millis(20));

        let (data, status) = cache.retrieve("k", false).expect("extended");
        assert_eq!(data, Bytes::from_static(b"data"));
        assert_eq!(status, LookupStatus::Hit);
    }

    #[test]
    fn remove_is_idempotent() {
        let cache = cache();
        cache.remove("absent");
        cache
            .store("k", Bytes::from_static(b"data"), Duration::from_secs(60))
            .expect("store");
        cache.remove("k");
        cache.remove("k");
        assert!(cache.retrieve("k", false).is_err());
        assert_eq!(cache.usage(), (0, 0));
    }

    #[test]
    fn bulk_remove_clears_every_key_under_concurrent_writes() {
        let cache = Arc::new(cache());
        let keys: Vec<String> = (0..50).map(|i| format!("victim-{i}")).collect();
        for key in &keys {
            cache
                .store(key, Bytes::from_static(b"v"), Duration::from_secs(60))
                .expect("store");
        }

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..200 {
                    cache
                        .store(
                            &format!("other-{i}"),
                            Bytes::from_static(b"o"),
                            Duration::from_secs(60),
                        )
                        .expect("store");
                }
            })
        };
        cache.bulk_remove(&keys, false);
        writer.join().expect("writer thread");

        for key in &keys {
            let err = cache.retrieve(key, false).expect_err("removed");
            assert_eq!(err.status(), LookupStatus::Miss);
        }
        assert!(cache.retrieve("other-199", false).is_ok());
    }

    #[test]
    fn reap_evicts_through_no_lock_path() {
        let config = CacheConfig {
            index: IndexOptions {
                max_size_bytes: 0,
                max_size_objects: 2,
                max_size_backoff_objects: 0,
                ..Default::default()
            },
            ..CacheConfig::memory("small")
        };
        let cache = connected(config);
        cache
            .store("expired", Bytes::from_static(b"x"), Duration::ZERO)
            .expect("store");
        for key in ["a", "b", "c"] {
            cache
                .store(key, Bytes::from_static(b"x"), Duration::from_secs(60))
                .expect("store");
        }
        cache.retrieve("a", false).expect("touch a");

        cache.reap();

        assert!(cache.retrieve("expired", true).is_err());
        assert!(cache.retrieve("b", false).is_err());
        assert!(cache.retrieve("a", false).is_ok());
        assert!(cache.retrieve("c", false).is_ok());
        assert_eq!(cache.usage().1, 2);
    }

    #[test]
    fn huge_ttl_saturates_instead_of_panicking() {
        let cache = cache();
        cache
            .store("k", Bytes::from_static(b"v"), Duration::from_secs(u64::MAX))
            .expect("store with huge ttl");
        cache
            .store_reference(
                "ref",
                Arc::new(Series { points: vec![1] }),
                Duration::MAX,
            )
            .expect("store reference with huge ttl");
        cache.set_ttl("k", Duration::MAX);

        assert_eq!(cache.retrieve("k", false).expect("hit").1, LookupStatus::Hit);
        assert_eq!(
            cache.retrieve_reference("ref", false).expect("hit").1,
            LookupStatus::Hit
        );
    }

    #[test]
    fn racing_store_and_remove_keep_index_in_step() {
        let cache = Arc::new(cache());
        for _ in 0..500 {
            let barrier = Arc::new(Barrier::new(2));
            let writer = {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .store("k", Bytes::from_static(b"v"), Duration::from_secs(60))
                        .expect("store");
                })
            };
            barrier.wait();
            cache.remove("k");
            writer.join().expect("writer thread");

            assert_eq!(cache.entries.contains_key("k"), cache.index.tracks("k"));
            assert_eq!(cache.usage().1, cache.entries.len() as u64);
        }
    }

    #[test]
    fn concurrent_writers_and_reaper_keep_index_and_map_aligned() {
        let config = CacheConfig {
            index: IndexOptions {
                max_size_bytes: 0,
                max_size_objects: 4,
                max_size_backoff_objects: 2,
                ..Default::default()
            },
            ..CacheConfig::memory("small")
        };
        let cache = Arc::new(connected(config));
        let keys: Vec<String> = (0..8).map(|i| format!("series-{i}")).collect();

        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                let keys = keys.clone();
                thread::spawn(move || {
                    for round in 0..500 {
                        let key = &keys[(round + worker) % keys.len()];
                        match (round + worker) % 4 {
                            0 => cache.remove(key),
                            1 => cache.reap(),
                            2 => cache.set_ttl(key, Duration::from_secs(120)),
                            _ => cache
                                .store(key, Bytes::from_static(b"v"), Duration::from_secs(60))
                                .expect("store"),
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker thread");
        }

        for key in &keys {
            assert_eq!(
                cache.entries.contains_key(key.as_str()),
                cache.index.tracks(key),
                "index and map disagree on {key}"
            );
        }
        assert_eq!(cache.usage().1, cache.entries.len() as u64);
    }

    #[test]
    fn references_round_trip_without_serialization() {
        let cache = cache();
        let series = Arc::new(Series {
            points: vec![1, 2, 3],
        });
        cache
            .store_reference("ref", series, Duration::from_secs(60))
            .expect("store reference");

        let (object, status) = cache.retrieve_reference("ref", false).expect("hit");
        assert_eq!(status, LookupStatus::Hit);
        let series = object.downcast_ref::<Series>().expect("stored type");
        assert_eq!(series.points, vec![1, 2, 3]);
        assert_eq!(cache.usage(), (3 + 24, 1));

        assert!(cache.retrieve("ref", false).is_err());
        cache
            .store("bytes", Bytes::from_static(b"b"), Duration::from_secs(60))
            .expect("store");
        assert!(cache.retrieve_reference("bytes", false).is_err());
    }

    #[test]
    fn closed_cache_rejects_operations() {
        let cache = cache();
        cache
            .store("k", Bytes::from_static(b"data"), Duration::from_secs(60))
            .expect("store");
        cache.close().expect("close");

        assert!(matches!(
            cache.retrieve("k", false),
            Err(CacheError::Closed { .. })
        ));
        assert!(matches!(
            cache.store("k", Bytes::new(), Duration::from_secs(1)),
            Err(CacheError::Closed { .. })
        ));
        cache.remove("k");
        cache.set_ttl("k", Duration::from_secs(1));
    }

    #[test]
    fn exposes_memory_capability_and_configuration() {
        let cache = cache();
        assert!(cache.as_memory_cache().is_some());
        assert_eq!(cache.configuration().name, "test");
        assert_eq!(cache.cache_type(), "memory");
    }
}
