//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::{
    application::resolver::normalize_base_domain,
    cache::config::{
        DEFAULT_MAX_FILE_ENTRIES, DEFAULT_MAX_FILE_SIZE, DEFAULT_MAX_SITES, DEFAULT_REFRESH_SECS,
        DEFAULT_TIMEOUT_SECS,
    },
    domain::DEFAULT_BRANCH,
};

mod cli;

pub use cli::{CheckArgs, CliArgs, Command, ServeArgs, ServeOverrides, UpstreamOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "forge-pages";
const ENV_PREFIX: &str = "FORGE_PAGES";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: u32 = 50;
const DEFAULT_REDIRECT_SCHEME: &str = "https";
const DEFAULT_REDIRECT_CODE: u16 = 302;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub pages: PagesSettings,
    pub cache: CacheSettings,
    /// Added to every served file.
    pub headers: HeaderMap,
    pub redirect: Option<RedirectSettings>,
    pub errors: ErrorPageSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub server: Url,
    pub token: Option<String>,
    pub page_size: NonZeroU32,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct PagesSettings {
    /// Base domain with a single leading dot.
    pub domain: String,
    pub branch: String,
    /// Directory inside the branch holding the site; empty or `/dir`.
    pub root: String,
    pub alias_file: Option<PathBuf>,
    pub shared_alias: bool,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub refresh: Duration,
    pub timeout: Duration,
    pub max_file_size: u64,
    pub max_file_entries: NonZeroUsize,
    pub max_sites: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct RedirectSettings {
    pub scheme: String,
    pub status: StatusCode,
}

/// Error body files keyed by `"404"`-style codes or `"40x"`-style classes.
#[derive(Debug, Clone, Default)]
pub struct ErrorPageSettings {
    pub pages: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

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
        Some(Command::Check(args)) => raw.apply_upstream_overrides(&args.upstream),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
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
    upstream: RawUpstreamSettings,
    pages: RawPagesSettings,
    cache: RawCacheSettings,
    headers: BTreeMap<String, String>,
    redirect: RawRedirectSettings,
    errors: BTreeMap<String, PathBuf>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(domain) = overrides.pages_domain.as_ref() {
            self.pages.domain = Some(domain.clone());
        }
        if let Some(branch) = overrides.pages_branch.as_ref() {
            self.pages.branch = Some(branch.clone());
        }
        if let Some(path) = overrides.pages_alias_file.as_ref() {
            self.pages.alias_file = Some(path.clone());
        }
        if let Some(seconds) = overrides.cache_refresh_seconds {
            self.cache.refresh_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.cache_timeout_seconds {
            self.cache.timeout_seconds = Some(seconds);
        }
        if let Some(bytes) = overrides.cache_max_file_size {
            self.cache.max_file_size = Some(bytes);
        }

        self.apply_upstream_overrides(&overrides.upstream);
    }

    fn apply_upstream_overrides(&mut self, overrides: &UpstreamOverrides) {
        if let Some(server) = overrides.upstream_server.as_ref() {
            self.upstream.server = Some(server.clone());
        }
        if let Some(token) = overrides.upstream_token.as_ref() {
            self.upstream.token = Some(token.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            pages,
            cache,
            headers,
            redirect,
            errors,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let upstream = build_upstream_settings(upstream)?;
        let pages = build_pages_settings(pages)?;
        let cache = build_cache_settings(cache)?;
        let headers = build_headers(headers)?;
        let redirect = build_redirect_settings(redirect)?;
        let errors = build_error_page_settings(errors)?;

        Ok(Self {
            server,
            logging,
            upstream,
            pages,
            cache,
            headers,
            redirect,
            errors,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let server = non_empty(upstream.server)
        .ok_or_else(|| LoadError::invalid("upstream.server", "must be set"))?;
    let server = Url::parse(server.trim_end_matches('/'))
        .map_err(|err| LoadError::invalid("upstream.server", format!("invalid url: {err}")))?;
    if !matches!(server.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream.server",
            "scheme must be http or https",
        ));
    }

    let page_size = upstream.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let page_size = NonZeroU32::new(page_size)
        .ok_or_else(|| LoadError::invalid("upstream.page_size", "must be greater than zero"))?;

    let timeout = match upstream.timeout_seconds {
        Some(0) => {
            return Err(LoadError::invalid(
                "upstream.timeout_seconds",
                "must be greater than zero",
            ));
        }
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => None,
    };

    Ok(UpstreamSettings {
        server,
        token: non_empty(upstream.token),
        page_size,
        timeout,
    })
}

fn build_pages_settings(pages: RawPagesSettings) -> Result<PagesSettings, LoadError> {
    let domain = non_empty(pages.domain)
        .map(|domain| normalize_base_domain(&domain))
        .ok_or_else(|| LoadError::invalid("pages.domain", "must be set"))?;
    if domain.len() < 2 {
        return Err(LoadError::invalid("pages.domain", "must not be empty"));
    }

    let branch = non_empty(pages.branch).unwrap_or_else(|| DEFAULT_BRANCH.to_string());
    let root = pages
        .root
        .map(|root| normalize_root(&root))
        .unwrap_or_default();
    let alias_file = pages
        .alias_file
        .filter(|path| !path.as_os_str().is_empty());

    Ok(PagesSettings {
        domain,
        branch,
        root,
        alias_file,
        shared_alias: pages.shared_alias.unwrap_or(false),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let refresh = cache.refresh_seconds.unwrap_or(DEFAULT_REFRESH_SECS);
    let timeout = cache.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if refresh == 0 {
        return Err(LoadError::invalid(
            "cache.refresh_seconds",
            "must be greater than zero",
        ));
    }
    if timeout < refresh {
        return Err(LoadError::invalid(
            "cache.timeout_seconds",
            "must not be shorter than cache.refresh_seconds",
        ));
    }

    let max_file_entries = cache
        .max_file_entries
        .unwrap_or(DEFAULT_MAX_FILE_ENTRIES);
    let max_sites = cache.max_sites.unwrap_or(DEFAULT_MAX_SITES);

    Ok(CacheSettings {
        refresh: Duration::from_secs(refresh),
        timeout: Duration::from_secs(timeout),
        max_file_size: cache.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE),
        max_file_entries: non_zero_usize(max_file_entries, "cache.max_file_entries")?,
        max_sites: non_zero_usize(max_sites, "cache.max_sites")?,
    })
}

fn build_headers(headers: BTreeMap<String, String>) -> Result<HeaderMap, LoadError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| LoadError::invalid("headers", format!("`{name}`: {err}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|err| LoadError::invalid("headers", format!("`{name}`: {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn build_redirect_settings(
    redirect: RawRedirectSettings,
) -> Result<Option<RedirectSettings>, LoadError> {
    if !redirect.enabled.unwrap_or(false) {
        return Ok(None);
    }

    let scheme = non_empty(redirect.scheme).unwrap_or_else(|| DEFAULT_REDIRECT_SCHEME.to_string());
    if !matches!(scheme.as_str(), "http" | "https") {
        return Err(LoadError::invalid(
            "redirect.scheme",
            "must be http or https",
        ));
    }

    let code = redirect.code.unwrap_or(DEFAULT_REDIRECT_CODE);
    let status = StatusCode::from_u16(code)
        .ok()
        .filter(StatusCode::is_redirection)
        .ok_or_else(|| LoadError::invalid("redirect.code", "must be a 3xx status"))?;

    Ok(Some(RedirectSettings { scheme, status }))
}

fn build_error_page_settings(
    errors: BTreeMap<String, PathBuf>,
) -> Result<ErrorPageSettings, LoadError> {
    let mut pages = BTreeMap::new();
    for (key, path) in errors {
        let key = key.to_ascii_lowercase();
        if !is_error_page_key(&key) {
            return Err(LoadError::invalid(
                "errors",
                format!("`{key}` is neither a 4xx/5xx status nor a `40x`/`50x` class"),
            ));
        }
        pages.insert(key, path);
    }
    Ok(ErrorPageSettings { pages })
}

fn is_error_page_key(key: &str) -> bool {
    match key {
        "40x" | "50x" => true,
        _ => key
            .parse::<u16>()
            .is_ok_and(|code| (400..600).contains(&code) && key.len() == 3),
    }
}

fn normalize_root(root: &str) -> String {
    let trimmed = root.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: usize, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    server: Option<String>,
    token: Option<String>,
    page_size: Option<u32>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPagesSettings {
    domain: Option<String>,
    branch: Option<String>,
    root: Option<String>,
    alias_file: Option<PathBuf>,
    shared_alias: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    refresh_seconds: Option<u64>,
    timeout_seconds: Option<u64>,
    max_file_size: Option<u64>,
    max_file_entries: Option<usize>,
    max_sites: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedirectSettings {
    enabled: Option<bool>,
    scheme: Option<String>,
    code: Option<u16>,
}

#[cfg(test)]
mod tests;
