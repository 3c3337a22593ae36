use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            "paperwall_fetch_regions_total",
            Unit::Count,
            "Acquisition passes per region, labelled by outcome."
        );
        describe_counter!(
            "paperwall_fetch_descriptors_total",
            Unit::Count,
            "Listing descriptors processed, labelled by outcome."
        );
        describe_counter!(
            "paperwall_retention_removed_total",
            Unit::Count,
            "Acquisitions removed by retention sweeps."
        );
        describe_counter!(
            "paperwall_store_puts_total",
            Unit::Count,
            "Variant blobs written to the object store."
        );
        describe_counter!(
            "paperwall_store_deletes_total",
            Unit::Count,
            "Variant blobs reclaimed from the object store."
        );
        describe_counter!(
            "paperwall_on_demand_fetch_total",
            Unit::Count,
            "Acquisition passes triggered by lookups that found no record."
        );
    });
}
