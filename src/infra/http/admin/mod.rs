mod caches;
mod health;
mod origins;
mod state;

pub use state::AdminState;

use axum::{Router, middleware, routing::get};

use super::middleware::log_responses;

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health::admin_health))
        .route("/caches", get(caches::admin_caches))
        .route("/origins", get(origins::admin_origins))
        .route("/origins/{name}/health", get(origins::admin_origin_health))
        .layer(middleware::from_fn(log_responses))
        .with_state(state)
}
