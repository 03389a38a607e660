use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::instrument::{
    METRIC_BYTE_OPERATIONS, METRIC_EVENTS, METRIC_OBJECT_OPERATIONS, METRIC_USAGE_BYTES,
    METRIC_USAGE_OBJECTS,
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

/// Registers descriptions for the cache metrics with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_OBJECT_OPERATIONS,
            Unit::Count,
            "Cache operations by cache, operation and lookup status."
        );
        describe_counter!(
            METRIC_BYTE_OPERATIONS,
            Unit::Bytes,
            "Payload bytes moved by cache operations."
        );
        describe_counter!(
            METRIC_EVENTS,
            Unit::Count,
            "Cache events such as evictions and errors, by reason."
        );
        describe_gauge!(
            METRIC_USAGE_OBJECTS,
            Unit::Count,
            "Objects currently held by each cache."
        );
        describe_gauge!(
            METRIC_USAGE_BYTES,
            Unit::Bytes,
            "Bytes currently held by each cache."
        );
    });
}
