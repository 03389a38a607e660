use crate::cache::CacheRegistry;
use crate::proxy::ClientRegistry;

#[derive(Clone)]
pub struct AdminState {
    pub caches: CacheRegistry,
    pub clients: ClientRegistry,
}
