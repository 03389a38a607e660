//! Cache abstraction shared by every storage engine.
//!
//! - [`Cache`]: the capability set every backend implements
//! - [`MemoryCache`]: storage of live objects for same-process consumers
//! - [`ReferenceObject`]: objects that report their approximate footprint
//! - [`CacheRegistry`]: named, connected cache instances built from configuration
//!
//! Backends own their concurrency control and drive the hooks in
//! [`instrument`] on every operation.
//!
//! ```toml
//! [caches.default]
//! engine = "memory"
//! max_size_objects = 10000
//!
//! [caches.disk]
//! engine = "filesystem"
//! path = "/var/cache/chronostash"
//! ```

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

mod config;
mod error;
mod filesystem;
mod index;
pub mod instrument;
mod lock;
mod memory;
mod registry;
mod status;

pub use config::{
    CacheConfig, CacheEngine, DEFAULT_CACHE_NAME, DEFAULT_FILESYSTEM_PATH, IndexOptions,
    MAX_OBJECT_TTL_SECS,
};
pub use error::CacheError;
pub use filesystem::FilesystemCache;
pub use memory::InMemoryCache;
pub use registry::CacheRegistry;
pub use status::LookupStatus;

/// An in-process object that can report its approximate memory footprint.
pub trait ReferenceObject: Any + Send + Sync {
    /// Approximate number of bytes held by this object and its members.
    fn approximate_size(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

impl dyn ReferenceObject {
    /// Borrows the stored object as its concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Capability contract every cache engine satisfies.
///
/// Retrieval must fail with [`CacheError::KeyNotFound`] on a miss.
pub trait Cache: Send + Sync {
    /// Makes the backend ready. Called once at startup.
    fn connect(&self) -> Result<(), CacheError>;

    /// Stores `data` under `key` until `now + ttl`, replacing any previous entry.
    fn store(&self, key: &str, data: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Returns the payload stored under `key`.
    ///
    /// Entries past their deadline are reported as `Expired` misses unless
    /// `allow_expired` is set, in which case they are served as `ExpiredHit`
    /// without refreshing their TTL.
    fn retrieve(&self, key: &str, allow_expired: bool) -> Result<(Bytes, LookupStatus), CacheError>;

    /// Resets the deadline of an existing entry. No-op for absent keys.
    fn set_ttl(&self, key: &str, ttl: Duration);

    /// Deletes one entry. Removing an absent key is not an error.
    fn remove(&self, key: &str);

    /// Deletes a batch of entries.
    ///
    /// `no_lock` means the caller already holds the backend's structural lock.
    fn bulk_remove(&self, keys: &[String], no_lock: bool);

    /// Releases backend resources. Later operations fail with `Closed`.
    fn close(&self) -> Result<(), CacheError>;

    /// Configuration the backend was built with.
    fn configuration(&self) -> &CacheConfig;

    /// Engine label used by instrumentation.
    fn cache_type(&self) -> &'static str {
        self.configuration().engine.as_str()
    }

    /// The reference-storage view of this cache, when the engine supports it.
    fn as_memory_cache(&self) -> Option<&dyn MemoryCache> {
        None
    }

    /// Runs one expiration and size eviction sweep.
    fn reap(&self) {}
}

/// A cache that can also hold live object references, skipping serialization.
///
/// Reference entries and byte entries share the key space; a key holds
/// whichever kind was stored last and reads of the other kind miss.
pub trait MemoryCache: Cache {
    fn store_reference(
        &self,
        key: &str,
        object: Arc<dyn ReferenceObject>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    fn retrieve_reference(
        &self,
        key: &str,
        allow_expired: bool,
    ) -> Result<(Arc<dyn ReferenceObject>, LookupStatus), CacheError>;
}

/// Builds the backend named by `config.engine`. The result is not yet connected.
pub fn new_cache(config: CacheConfig) -> Arc<dyn Cache> {
    match config.engine {
        CacheEngine::Memory => Arc::new(InMemoryCache::new(config)),
        CacheEngine::Filesystem { .. } => Arc::new(FilesystemCache::new(config)),
    }
}
