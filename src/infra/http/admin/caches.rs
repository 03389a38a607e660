use axum::{Json, extract::State};
use serde::Serialize;

use super::AdminState;

#[derive(Debug, Serialize)]
pub(super) struct CacheSummary {
    name: String,
    #[serde(rename = "type")]
    cache_type: &'static str,
    object_ttl_secs: u64,
    reap_interval_ms: u64,
}

pub(super) async fn admin_caches(State(state): State<AdminState>) -> Json<Vec<CacheSummary>> {
    let caches = state
        .caches
        .iter()
        .map(|(name, cache)| {
            let config = cache.configuration();
            CacheSummary {
                name: name.to_string(),
                cache_type: cache.cache_type(),
                object_ttl_secs: config.object_ttl.as_secs(),
                reap_interval_ms: config.index.reap_interval.as_millis() as u64,
            }
        })
        .collect();
    Json(caches)
}
