use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the chronostash binary.
#[derive(Debug, Parser)]
#[command(
    name = "chronostash",
    version,
    about = "Caching reverse proxy for time-series backends"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CHRONOSTASH_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the proxy and admin listeners.
    Serve(Box<ServeArgs>),
    /// Validate configuration, connect caches and register origins, then exit.
    Check,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the host both listeners bind to.
    #[arg(long = "listen-host", value_name = "HOST")]
    pub listen_host: Option<String>,

    /// Override the proxy listener port.
    #[arg(long = "listen-port", value_name = "PORT")]
    pub listen_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
