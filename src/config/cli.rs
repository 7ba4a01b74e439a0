use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the forge-pages binary.
#[derive(Debug, Parser)]
#[command(
    name = "forge-pages",
    version,
    about = "Static pages server for Gitea and Forgejo repositories"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "FORGE_PAGES_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve pages over HTTP.
    Serve(Box<ServeArgs>),
    /// Validate the configuration and upstream connectivity, then exit.
    Check(CheckArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub upstream: UpstreamOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct UpstreamOverrides {
    /// Override the Gitea/Forgejo server URL.
    #[arg(long = "upstream-server", value_name = "URL")]
    pub upstream_server: Option<String>,

    /// Override the API token sent upstream.
    #[arg(long = "upstream-token", env = "FORGE_PAGES_UPSTREAM_TOKEN", value_name = "TOKEN")]
    pub upstream_token: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub upstream: UpstreamOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override the base domain served as `<account>.<domain>`.
    #[arg(long = "pages-domain", value_name = "DOMAIN")]
    pub pages_domain: Option<String>,

    /// Override the branch published for every repository.
    #[arg(long = "pages-branch", value_name = "BRANCH")]
    pub pages_branch: Option<String>,

    /// Override the alias snapshot path.
    #[arg(long = "pages-alias-file", value_name = "PATH")]
    pub pages_alias_file: Option<PathBuf>,

    /// Override the metadata refresh interval.
    #[arg(long = "cache-refresh-seconds", value_name = "SECONDS")]
    pub cache_refresh_seconds: Option<u64>,

    /// Override the cache entry lifetime.
    #[arg(long = "cache-timeout-seconds", value_name = "SECONDS")]
    pub cache_timeout_seconds: Option<u64>,

    /// Override the largest file kept in the cache, in bytes.
    #[arg(long = "cache-max-file-size", value_name = "BYTES")]
    pub cache_max_file_size: Option<u64>,
}
