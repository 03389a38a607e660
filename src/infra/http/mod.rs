mod admin;
mod middleware;

pub use admin::{AdminState, build_admin_router};

use axum::Router;

/// Wraps the registered origin routes with the public listener's request logging.
pub fn build_proxy_router(origins: Router) -> Router {
    origins.layer(axum::middleware::from_fn(middleware::log_responses))
}
