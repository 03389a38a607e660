use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use super::AdminState;

#[derive(Debug, Serialize)]
pub(super) struct OriginSummary {
    name: String,
    #[serde(rename = "type")]
    origin_type: &'static str,
    cache_name: String,
    cache_type: &'static str,
    upstream: String,
}

pub(super) async fn admin_origins(State(state): State<AdminState>) -> Json<Vec<OriginSummary>> {
    let origins = state
        .clients
        .iter()
        .map(|(name, client)| {
            let config = client.configuration();
            OriginSummary {
                name: name.to_string(),
                origin_type: client.origin_type(),
                cache_name: config.cache_name.clone(),
                cache_type: client.cache().cache_type(),
                upstream: config.upstream.to_string(),
            }
        })
        .collect();
    Json(origins)
}

pub(super) async fn admin_origin_health(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    let Some(client) = state.clients.get(&name) else {
        return (StatusCode::NOT_FOUND, format!("unknown origin `{name}`")).into_response();
    };

    match client.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            warn!(
                target = "chronostash::http::admin",
                origin = %name,
                error = %err,
                "origin health probe failed"
            );
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
    }
}
