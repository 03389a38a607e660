//! Named, connected cache instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

use super::error::CacheError;
use super::{Cache, CacheConfig, new_cache};

/// Caches built from configuration, keyed by their configured name.
#[derive(Clone, Default)]
pub struct CacheRegistry {
    caches: BTreeMap<String, Arc<dyn Cache>>,
}

impl CacheRegistry {
    /// Builds and connects every configured cache. The first failure aborts.
    pub fn from_configs<I>(configs: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = CacheConfig>,
    {
        let mut registry = Self::default();
        for config in configs {
            let cache = new_cache(config);
            cache.connect()?;
            registry.insert(cache);
        }
        Ok(registry)
    }

    /// Adds an already connected cache under its configured name.
    pub fn insert(&mut self, cache: Arc<dyn Cache>) {
        let name = cache.configuration().name.clone();
        if self.caches.insert(name.clone(), cache).is_some() {
            warn!(cache_name = %name, "replaced an existing cache registration");
        }
    }

    pub fn get_cache(&self, name: &str) -> Result<Arc<dyn Cache>, CacheError> {
        self.caches.get(name).cloned().ok_or_else(|| {
            CacheError::configuration(format!("could not find cache named `{name}`"))
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.caches.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Cache>)> {
        self.caches.iter().map(|(name, cache)| (name.as_str(), cache))
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Starts one periodic reap task per cache, ticking at its `reap_interval`.
    pub fn spawn_reapers(&self) -> Vec<JoinHandle<()>> {
        self.caches
            .values()
            .map(|cache| {
                let cache = Arc::clone(cache);
                let period = cache.configuration().index.reap_interval;
                tokio::spawn(async move {
                    let mut ticker = interval(period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        cache.reap();
                    }
                })
            })
            .collect()
    }

    /// Closes every cache, logging failures instead of stopping at the first.
    pub fn close_all(&self) {
        for (name, cache) in &self.caches {
            match cache.close() {
                Ok(()) => info!(cache_name = %name, "cache closed"),
                Err(err) => warn!(cache_name = %name, error = %err, "failed to close cache"),
            }
        }
    }
}
