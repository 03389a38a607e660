//! Origin clients and their HTTP routes.
//!
//! Each configured origin gets one client bound to a shared named cache. The
//! client builds its own routes; registration mounts them under `/{origin}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;

use crate::cache::Cache;

pub mod engine;
mod error;
pub mod influxdb;
mod origin;
pub mod prometheus;
mod registration;

pub use engine::{CachedDocument, ENGINE_NAME, RESULT_HEADER, derive_cache_key};
pub use error::ProxyError;
pub use influxdb::InfluxDbClient;
pub use origin::{
    DEFAULT_ORIGIN_NAME, DEFAULT_ORIGIN_TIMEOUT_SECS, DEFAULT_ORIGIN_TYPE,
    DEFAULT_ORIGIN_UPSTREAM, OriginConfig, is_mountable_name,
};
pub use prometheus::PrometheusClient;
pub use registration::{OriginConstructor, OriginFactories, RegistrationError, register_proxy_routes};

/// A proxy client for one configured origin.
#[async_trait]
pub trait OriginClient: Send + Sync {
    fn name(&self) -> &str;

    /// Normalized type of the client variant, e.g. `prometheus`.
    fn origin_type(&self) -> &'static str;

    fn configuration(&self) -> &OriginConfig;

    /// The named cache this origin stores into. Shared, not owned.
    fn cache(&self) -> &Arc<dyn Cache>;

    /// Builds the origin's routes, relative to its `/{origin_name}` mount point.
    fn register_routes(&self, origin_name: &str, config: &OriginConfig) -> Router;

    /// Probes the upstream once.
    async fn health_check(&self) -> Result<(), ProxyError>;
}

/// Registered origin clients keyed by origin name.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: BTreeMap<String, Arc<dyn OriginClient>>,
}

impl ClientRegistry {
    pub(crate) fn insert(&mut self, name: String, client: Arc<dyn OriginClient>) {
        self.clients.insert(name, client);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn OriginClient>> {
        self.clients.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn OriginClient>)> {
        self.clients
            .iter()
            .map(|(name, client)| (name.as_str(), client))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}
