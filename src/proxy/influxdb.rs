use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    routing::{any, get},
};
use tracing::debug;

use crate::cache::Cache;

use super::engine::{ProxyContext, handle_cached, handle_health, handle_proxy};
use super::error::ProxyError;
use super::origin::OriginConfig;
use super::OriginClient;

pub const ORIGIN_TYPE: &str = "influxdb";

const HEALTH_PATH: &str = "/ping";

/// Client for the InfluxDB 1.x query API. Only `/query` is cached.
pub struct InfluxDbClient {
    name: String,
    context: ProxyContext,
}

impl InfluxDbClient {
    pub fn new(
        name: &str,
        config: OriginConfig,
        cache: Arc<dyn Cache>,
    ) -> Result<Self, ProxyError> {
        Ok(Self {
            name: name.to_string(),
            context: ProxyContext::new(config, cache, HEALTH_PATH)?,
        })
    }

    pub fn boxed(
        name: &str,
        config: OriginConfig,
        cache: Arc<dyn Cache>,
    ) -> Result<Arc<dyn OriginClient>, ProxyError> {
        Ok(Arc::new(Self::new(name, config, cache)?))
    }
}

#[async_trait]
impl OriginClient for InfluxDbClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn origin_type(&self) -> &'static str {
        ORIGIN_TYPE
    }

    fn configuration(&self) -> &OriginConfig {
        self.context.origin()
    }

    fn cache(&self) -> &Arc<dyn Cache> {
        self.context.cache()
    }

    fn register_routes(&self, origin_name: &str, config: &OriginConfig) -> Router {
        debug!(origin = origin_name, upstream = %config.upstream, "influxdb routes built");
        Router::new()
            .route("/query", any(handle_cached))
            .route("/health", get(handle_health))
            .fallback(handle_proxy)
            .with_state(self.context.clone())
    }

    async fn health_check(&self) -> Result<(), ProxyError> {
        self.context.probe().await
    }
}
