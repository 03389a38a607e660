use std::process;

use chronostash::{
    application::{
        error::AppError,
        runtime::{Runtime, build_runtime},
    },
    cache::CacheError,
    config,
    infra::{error::InfraError, telemetry},
    proxy::{OriginFactories, RegistrationError},
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        log_application_error(error);
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || log_application_error(error));
}

fn log_application_error(error: &AppError) {
    match error {
        AppError::Registration(
            RegistrationError::UnknownCache {
                origin, cache_name, ..
            },
        ) => error!(
            origin = %origin,
            cache_name = %cache_name,
            error = %error,
            "origin references an unknown cache"
        ),
        AppError::Registration(RegistrationError::UnknownOriginType {
            origin,
            origin_type,
        }) => error!(
            origin = %origin,
            origin_type = %origin_type,
            error = %error,
            "origin has an unknown type"
        ),
        AppError::Registration(RegistrationError::InvalidName { origin }) => error!(
            origin = %origin,
            error = %error,
            "origin name cannot be mounted"
        ),
        AppError::Registration(RegistrationError::Client { origin, .. }) => error!(
            origin = %origin,
            error = %error,
            "origin client could not be built"
        ),
        AppError::Cache(CacheError::Connection { cache, .. }) => error!(
            cache_name = %cache,
            error = %error,
            "cache failed to connect"
        ),
        _ => error!(error = %error, "application error"),
    }
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Check => run_check(settings),
    }
}

fn run_check(settings: config::Settings) -> Result<(), AppError> {
    let runtime = build_runtime(
        &settings.caches,
        &settings.origins,
        &OriginFactories::default(),
    )?;
    info!(
        caches = runtime.caches.len(),
        origins = runtime.clients.len(),
        "configuration is valid"
    );
    runtime.caches.close_all();
    Ok(())
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let Runtime {
        caches,
        proxy_router,
        admin_router,
        ..
    } = build_runtime(
        &settings.caches,
        &settings.origins,
        &OriginFactories::default(),
    )?;

    let reapers = caches.spawn_reapers();

    let result = serve_http(&settings, proxy_router, admin_router).await;

    for handle in reapers {
        handle.abort();
        let _ = handle.await;
    }
    caches.close_all();

    result
}

async fn serve_http(
    settings: &config::Settings,
    proxy_router: axum::Router,
    admin_router: axum::Router,
) -> Result<(), AppError> {
    let proxy_listener = tokio::net::TcpListener::bind(settings.server.listen_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        listen_addr = %settings.server.listen_addr,
        admin_addr = %settings.server.admin_addr,
        "listeners bound"
    );

    let proxy_server = axum::serve(proxy_listener, proxy_router.into_make_service());
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service());

    try_join!(proxy_server, admin_server)
        .map_err(|err| AppError::from(InfraError::server(err.to_string())))?;

    Ok(())
}
