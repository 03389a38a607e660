//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::BTreeMap, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{
    CacheConfig, CacheEngine, DEFAULT_CACHE_NAME, DEFAULT_FILESYSTEM_PATH, IndexOptions,
    MAX_OBJECT_TTL_SECS,
};
use crate::proxy::{
    DEFAULT_ORIGIN_NAME, DEFAULT_ORIGIN_TIMEOUT_SECS, DEFAULT_ORIGIN_TYPE,
    DEFAULT_ORIGIN_UPSTREAM, OriginConfig, is_mountable_name,
};

mod cli;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "chronostash";
const ENV_PREFIX: &str = "CHRONOSTASH";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_LISTEN_PORT: u16 = 8480;
const DEFAULT_ADMIN_PORT: u16 = 8481;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    /// Named caches, ordered by name.
    pub caches: Vec<CacheConfig>,
    /// Configured origins, ordered by name.
    pub origins: Vec<OriginConfig>,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: SocketAddr,
    pub admin_addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Check) | None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    caches: BTreeMap<String, RawCacheSettings>,
    origins: BTreeMap<String, RawOriginSettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    listen_port: Option<u16>,
    admin_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    engine: Option<String>,
    path: Option<PathBuf>,
    object_ttl_secs: Option<u64>,
    reap_interval_ms: Option<u64>,
    max_size_bytes: Option<u64>,
    max_size_backoff_bytes: Option<u64>,
    max_size_objects: Option<u64>,
    max_size_backoff_objects: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOriginSettings {
    #[serde(rename = "type")]
    origin_type: Option<String>,
    cache_name: Option<String>,
    upstream: Option<String>,
    timeout_secs: Option<u64>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.listen_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.listen_port {
            self.server.listen_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            caches,
            origins,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let caches = build_cache_settings(caches)?;
        let origins = build_origin_settings(origins)?;

        Ok(Self {
            server,
            logging,
            caches,
            origins,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let listen_port = server.listen_port.unwrap_or(DEFAULT_LISTEN_PORT);
    if listen_port == 0 {
        return Err(LoadError::invalid(
            "server.listen_port",
            "port must be greater than zero",
        ));
    }

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }
    if admin_port == listen_port {
        return Err(LoadError::invalid(
            "server.admin_port",
            "must differ from server.listen_port",
        ));
    }

    let listen_addr = parse_socket_addr(&host, listen_port)
        .map_err(|reason| LoadError::invalid("server.listen_addr", reason))?;
    let admin_addr = parse_socket_addr(&host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    Ok(ServerSettings {
        listen_addr,
        admin_addr,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(
    caches: BTreeMap<String, RawCacheSettings>,
) -> Result<Vec<CacheConfig>, LoadError> {
    if caches.is_empty() {
        return Ok(vec![CacheConfig::memory(DEFAULT_CACHE_NAME)]);
    }

    caches
        .into_iter()
        .map(|(name, raw)| build_cache_config(name, raw))
        .collect()
}

fn build_cache_config(name: String, raw: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let key = |field: &str| format!("caches.{name}.{field}");

    let engine = match raw
        .engine
        .as_deref()
        .map(|engine| engine.trim().to_ascii_lowercase())
        .as_deref()
    {
        None | Some("") | Some("memory") => CacheEngine::Memory,
        Some("filesystem") => CacheEngine::Filesystem {
            path: raw
                .path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FILESYSTEM_PATH).join(&name)),
        },
        Some(other) => {
            return Err(LoadError::invalid(
                key("engine"),
                format!("unsupported engine `{other}` (expected memory or filesystem)"),
            ));
        }
    };

    let mut config = CacheConfig::memory(name.clone());
    config.engine = engine;

    if let Some(secs) = raw.object_ttl_secs {
        if secs == 0 || secs > MAX_OBJECT_TTL_SECS {
            return Err(LoadError::invalid(
                key("object_ttl_secs"),
                format!("must be between 1 and {MAX_OBJECT_TTL_SECS}"),
            ));
        }
        config.object_ttl = Duration::from_secs(secs);
    }

    let defaults = IndexOptions::default();
    let reap_interval_ms = raw
        .reap_interval_ms
        .unwrap_or(defaults.reap_interval.as_millis() as u64);
    if reap_interval_ms == 0 {
        return Err(LoadError::invalid(
            key("reap_interval_ms"),
            "must be greater than zero",
        ));
    }

    config.index = IndexOptions {
        reap_interval: Duration::from_millis(reap_interval_ms),
        max_size_bytes: raw.max_size_bytes.unwrap_or(defaults.max_size_bytes),
        max_size_backoff_bytes: raw
            .max_size_backoff_bytes
            .unwrap_or(defaults.max_size_backoff_bytes),
        max_size_objects: raw.max_size_objects.unwrap_or(defaults.max_size_objects),
        max_size_backoff_objects: raw
            .max_size_backoff_objects
            .unwrap_or(defaults.max_size_backoff_objects),
    };

    Ok(config)
}

fn build_origin_settings(
    origins: BTreeMap<String, RawOriginSettings>,
) -> Result<Vec<OriginConfig>, LoadError> {
    if origins.is_empty() {
        let upstream = parse_upstream(DEFAULT_ORIGIN_UPSTREAM)
            .map_err(|reason| LoadError::invalid("origins.default.upstream", reason))?;
        return Ok(vec![OriginConfig::new(
            DEFAULT_ORIGIN_NAME,
            DEFAULT_ORIGIN_TYPE,
            upstream,
        )]);
    }

    origins
        .into_iter()
        .map(|(name, raw)| build_origin_config(name, raw))
        .collect()
}

fn build_origin_config(name: String, raw: RawOriginSettings) -> Result<OriginConfig, LoadError> {
    let key = |field: &str| format!("origins.{name}.{field}");

    if !is_mountable_name(&name) {
        return Err(LoadError::invalid(
            format!("origins.{name}"),
            "origin names must be non-empty and must not contain `/`, `{`, `}` or `*`",
        ));
    }

    let upstream = raw
        .upstream
        .as_deref()
        .ok_or_else(|| LoadError::invalid(key("upstream"), "is required"))
        .and_then(|value| {
            parse_upstream(value).map_err(|reason| LoadError::invalid(key("upstream"), reason))
        })?;

    let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_ORIGIN_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            key("timeout_secs"),
            "must be greater than zero",
        ));
    }

    let mut config = OriginConfig::new(
        name.clone(),
        raw.origin_type.unwrap_or_default(),
        upstream,
    );
    if let Some(cache_name) = raw.cache_name {
        config.cache_name = cache_name;
    }
    config.timeout = Duration::from_secs(timeout_secs);
    Ok(config)
}

fn parse_upstream(value: &str) -> Result<Url, String> {
    let url = Url::parse(value.trim()).map_err(|err| format!("invalid url `{value}`: {err}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(format!("unsupported scheme `{scheme}` in `{value}`")),
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}
