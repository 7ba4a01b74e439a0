use std::{backtrace::Backtrace, panic, sync::Once};

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::{ErrorLayer, SpanTrace};
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();
static PANIC_HOOK: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })?;

    install_panic_hook();
    Ok(())
}

/// Route panics through tracing with the active span trace attached.
fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        panic::set_hook(Box::new(|info| {
            let location = info
                .location()
                .map(|location| location.to_string())
                .unwrap_or_default();
            tracing::error!(
                target: "forge_pages::panic",
                location = %location,
                payload = %crate::application::error::panic_message(info.payload()),
                span_trace = %SpanTrace::capture(),
                backtrace = %Backtrace::capture(),
                "panic"
            );
        }));
    });
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pages_cache_file_hit_total",
            Unit::Count,
            "Files served from the per-site file cache."
        );
        describe_counter!(
            "pages_cache_file_miss_total",
            Unit::Count,
            "Files fetched upstream and stored in the file cache."
        );
        describe_counter!(
            "pages_cache_file_skip_total",
            Unit::Count,
            "Files streamed from upstream without caching because of their size."
        );
        describe_counter!(
            "pages_cache_site_refresh_total",
            Unit::Count,
            "Repository metadata refreshes against upstream."
        );
        describe_counter!(
            "pages_cache_account_refresh_total",
            Unit::Count,
            "Account repository-list refreshes against upstream."
        );
        describe_counter!(
            "pages_alias_registered_total",
            Unit::Count,
            "Custom domains bound to a repository."
        );
        describe_histogram!(
            "pages_upstream_request_ms",
            Unit::Milliseconds,
            "Upstream API request latency in milliseconds."
        );
    });
}
