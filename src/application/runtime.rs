use axum::Router;
use tracing::{error, info};

use crate::{
    cache::{CacheConfig, CacheRegistry},
    infra::http::{self, AdminState},
    proxy::{ClientRegistry, OriginConfig, OriginFactories, register_proxy_routes},
};

use super::error::AppError;

/// Connected caches, registered origins and the routers serving them.
pub struct Runtime {
    pub caches: CacheRegistry,
    pub clients: ClientRegistry,
    pub proxy_router: Router,
    pub admin_router: Router,
}

/// Connects every cache and registers every origin.
///
/// Caches that were connected are closed again when registration fails.
pub fn build_runtime(
    caches: &[CacheConfig],
    origins: &[OriginConfig],
    factories: &OriginFactories,
) -> Result<Runtime, AppError> {
    let cache_registry = CacheRegistry::from_configs(caches.iter().cloned())?;
    info!(
        caches = cache_registry.len(),
        names = ?cache_registry.names().collect::<Vec<_>>(),
        "caches connected"
    );

    let (origin_router, clients) = match register_proxy_routes(origins, &cache_registry, factories)
    {
        Ok(registered) => registered,
        Err(err) => {
            error!(error = %err, "origin registration failed; closing caches");
            cache_registry.close_all();
            return Err(err.into());
        }
    };
    info!(origins = clients.len(), "origins registered");

    let admin_router = http::build_admin_router(AdminState {
        caches: cache_registry.clone(),
        clients: clients.clone(),
    });

    Ok(Runtime {
        caches: cache_registry,
        clients,
        proxy_router: http::build_proxy_router(origin_router),
        admin_router,
    })
}
