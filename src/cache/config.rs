//! Per-cache configuration.
//!
//! Built once from `[caches.<name>]` sections and never mutated afterwards;
//! backends hand out a shared reference through `Cache::configuration`.

use std::{path::PathBuf, time::Duration};

pub const DEFAULT_CACHE_NAME: &str = "default";
pub const DEFAULT_FILESYSTEM_PATH: &str = "/tmp/chronostash";
pub const DEFAULT_OBJECT_TTL_SECS: u64 = 30;
pub const DEFAULT_REAP_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_MAX_SIZE_BACKOFF_BYTES: u64 = 16 * 1024 * 1024;
pub const DEFAULT_MAX_SIZE_OBJECTS: u64 = 0;
pub const DEFAULT_MAX_SIZE_BACKOFF_OBJECTS: u64 = 100;
/// Longest accepted object TTL: ten years.
pub const MAX_OBJECT_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;
pub const MAX_OBJECT_TTL: Duration = Duration::from_secs(MAX_OBJECT_TTL_SECS);

/// Storage engine backing a named cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEngine {
    Memory,
    Filesystem { path: PathBuf },
}

impl CacheEngine {
    /// Engine label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEngine::Memory => "memory",
            CacheEngine::Filesystem { .. } => "filesystem",
        }
    }
}

/// Size and sweep limits enforced by a backend's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexOptions {
    /// Interval between reap sweeps.
    pub reap_interval: Duration,
    /// Total payload bytes that trigger size eviction; zero disables it.
    pub max_size_bytes: u64,
    /// Bytes freed below `max_size_bytes` once eviction starts.
    pub max_size_backoff_bytes: u64,
    /// Object count that triggers eviction; zero disables it.
    pub max_size_objects: u64,
    /// Objects freed below `max_size_objects` once eviction starts.
    pub max_size_backoff_objects: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_millis(DEFAULT_REAP_INTERVAL_MS),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_size_backoff_bytes: DEFAULT_MAX_SIZE_BACKOFF_BYTES,
            max_size_objects: DEFAULT_MAX_SIZE_OBJECTS,
            max_size_backoff_objects: DEFAULT_MAX_SIZE_BACKOFF_OBJECTS,
        }
    }
}

impl IndexOptions {
    /// Byte total the reaper evicts down to, if byte eviction is enabled.
    pub fn bytes_target(&self) -> Option<u64> {
        (self.max_size_bytes > 0)
            .then(|| self.max_size_bytes.saturating_sub(self.max_size_backoff_bytes))
    }

    /// Object count the reaper evicts down to, if count eviction is enabled.
    pub fn objects_target(&self) -> Option<u64> {
        (self.max_size_objects > 0).then(|| {
            self.max_size_objects
                .saturating_sub(self.max_size_backoff_objects)
        })
    }
}

/// Configuration of one named cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub name: String,
    pub engine: CacheEngine,
    /// TTL applied to whole proxied responses.
    pub object_ttl: Duration,
    pub index: IndexOptions,
}

impl CacheConfig {
    /// In-memory cache with default limits.
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            engine: CacheEngine::Memory,
            object_ttl: Duration::from_secs(DEFAULT_OBJECT_TTL_SECS),
            index: IndexOptions::default(),
        }
    }

    /// Filesystem cache rooted at `path` with default limits.
    pub fn filesystem(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            engine: CacheEngine::Filesystem { path: path.into() },
            ..Self::memory(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let config = CacheConfig::memory("default");
        assert_eq!(config.engine.as_str(), "memory");
        assert_eq!(config.object_ttl, Duration::from_secs(30));
        assert_eq!(config.index.reap_interval, Duration::from_secs(3));
        assert_eq!(config.index.max_size_bytes, 512 * 1024 * 1024);
        assert_eq!(config.index.max_size_objects, 0);
    }

    #[test]
    fn eviction_targets_subtract_backoff() {
        let options = IndexOptions {
            max_size_bytes: 1000,
            max_size_backoff_bytes: 200,
            max_size_objects: 10,
            max_size_backoff_objects: 20,
            ..Default::default()
        };
        assert_eq!(options.bytes_target(), Some(800));
        assert_eq!(options.objects_target(), Some(0));
    }

    #[test]
    fn zero_limits_disable_eviction() {
        let options = IndexOptions {
            max_size_bytes: 0,
            max_size_objects: 0,
            ..Default::default()
        };
        assert_eq!(options.bytes_target(), None);
        assert_eq!(options.objects_target(), None);
    }

    #[test]
    fn filesystem_keeps_path() {
        let config = CacheConfig::filesystem("disk", "/var/cache/chronostash");
        assert_eq!(
            config.engine,
            CacheEngine::Filesystem {
                path: PathBuf::from("/var/cache/chronostash")
            }
        );
        assert_eq!(config.name, "disk");
    }
}
