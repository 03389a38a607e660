//! Binds configured origins to their caches and client variants.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tracing::info;

use crate::cache::{Cache, CacheError, CacheRegistry};

use super::error::ProxyError;
use super::origin::{DEFAULT_ORIGIN_TYPE, OriginConfig, is_mountable_name, normalize_origin_type};
use super::{ClientRegistry, InfluxDbClient, OriginClient, PrometheusClient, influxdb, prometheus};

/// Builds a client from its origin name, configuration and shared cache.
pub type OriginConstructor =
    fn(&str, OriginConfig, Arc<dyn Cache>) -> Result<Arc<dyn OriginClient>, ProxyError>;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("origin name `{origin}` cannot be used as a route prefix")]
    InvalidName { origin: String },
    #[error("origin `{origin}` references cache `{cache_name}`: {source}")]
    UnknownCache {
        origin: String,
        cache_name: String,
        #[source]
        source: CacheError,
    },
    #[error("origin `{origin}` has unknown type `{origin_type}`")]
    UnknownOriginType { origin: String, origin_type: String },
    #[error("origin `{origin}` could not be constructed: {source}")]
    Client {
        origin: String,
        #[source]
        source: ProxyError,
    },
}

/// Client constructors keyed by normalized origin type.
#[derive(Clone)]
pub struct OriginFactories {
    constructors: HashMap<String, OriginConstructor>,
}

impl Default for OriginFactories {
    fn default() -> Self {
        let mut factories = Self {
            constructors: HashMap::new(),
        };
        factories.register(prometheus::ORIGIN_TYPE, PrometheusClient::boxed);
        factories.register(influxdb::ORIGIN_TYPE, InfluxDbClient::boxed);
        factories
    }
}

impl OriginFactories {
    /// Adds or replaces the constructor for `origin_type`.
    pub fn register(&mut self, origin_type: &str, constructor: OriginConstructor) {
        self.constructors
            .insert(normalize_origin_type(origin_type), constructor);
    }

    /// Looks up a constructor case-insensitively; an empty type selects the default.
    pub fn resolve(&self, origin_type: &str) -> Option<OriginConstructor> {
        let normalized = normalize_origin_type(origin_type);
        let key = if normalized.is_empty() {
            DEFAULT_ORIGIN_TYPE
        } else {
            normalized.as_str()
        };
        self.constructors.get(key).copied()
    }
}

/// Resolves every origin to its cache and client variant, then builds and
/// mounts each client's routes under `/{origin}`.
///
/// Resolution completes for all origins before any client is built, so a bad
/// origin leaves nothing registered.
pub fn register_proxy_routes(
    origins: &[OriginConfig],
    caches: &CacheRegistry,
    factories: &OriginFactories,
) -> Result<(Router, ClientRegistry), RegistrationError> {
    let mut resolved = Vec::with_capacity(origins.len());
    for origin in origins {
        if !is_mountable_name(&origin.name) {
            return Err(RegistrationError::InvalidName {
                origin: origin.name.clone(),
            });
        }
        let cache = caches
            .get_cache(&origin.cache_name)
            .map_err(|source| RegistrationError::UnknownCache {
                origin: origin.name.clone(),
                cache_name: origin.cache_name.clone(),
                source,
            })?;
        let constructor = factories.resolve(&origin.normalized_type()).ok_or_else(|| {
            RegistrationError::UnknownOriginType {
                origin: origin.name.clone(),
                origin_type: origin.origin_type.clone(),
            }
        })?;
        resolved.push((origin, cache, constructor));
    }

    let mut clients = Vec::with_capacity(resolved.len());
    for (origin, cache, constructor) in resolved {
        let client = constructor(&origin.name, origin.clone(), cache).map_err(|source| {
            RegistrationError::Client {
                origin: origin.name.clone(),
                source,
            }
        })?;
        clients.push((origin, client));
    }

    let mut router = Router::new();
    let mut registry = ClientRegistry::default();
    for (origin, client) in clients {
        let routes = client.register_routes(&origin.name, origin);
        router = router.nest(&format!("/{}", origin.name), routes);
        info!(
            origin = %origin.name,
            origin_type = client.origin_type(),
            cache_name = %origin.cache_name,
            cache_type = client.cache().cache_type(),
            upstream = %origin.upstream,
            "origin registered"
        );
        registry.insert(origin.name.clone(), client);
    }

    Ok((router, registry))
}
