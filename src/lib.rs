//! Caching core of a reverse proxy for time-series query backends.
//!
//! - [`cache`]: the cache contract, its memory and filesystem engines, and the
//!   named cache registry
//! - [`proxy`]: origin clients, the object proxy cache and route registration
//! - [`config`]: layered settings (file, environment, CLI)
//! - [`infra`]: telemetry and the HTTP listeners

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod proxy;
