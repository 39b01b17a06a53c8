use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

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
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "blobcache_hit_total",
            Unit::Count,
            "Total number of pages served from the blob cache."
        );
        describe_counter!(
            "blobcache_miss_total",
            Unit::Count,
            "Total number of cache lookups that fell through to generation."
        );
        describe_counter!(
            "blobcache_bypass_total",
            Unit::Count,
            "Total number of requests that skipped the cache, by reason."
        );
        describe_counter!(
            "blobcache_store_failure_total",
            Unit::Count,
            "Total number of blob writes that failed or timed out."
        );
        describe_counter!(
            "blobcache_invalidate_total",
            Unit::Count,
            "Total number of cached pages removed by invalidation."
        );
        describe_histogram!(
            "blobcache_store_ms",
            Unit::Milliseconds,
            "Blob write latency in milliseconds."
        );
    });
}
