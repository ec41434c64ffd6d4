use crate::config::MetricsConfig;
use crate::error::AppError;
use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder and its HTTP listener when enabled.
///
/// With no recorder installed the counters below are no-ops.
pub fn init_metrics(config: &MetricsConfig) -> Result<Option<PrometheusHandle>, AppError> {
    if !config.enabled {
        return Ok(None);
    }

    let handle = PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.port))
        .add_global_label("service", "usage_metering")
        .install_recorder()
        .map_err(|e| AppError::Internal(format!("Failed to install metrics exporter: {e}")))?;

    info!("Metrics server started on :{}/metrics", config.port);
    Ok(Some(handle))
}

pub fn event_applied() {
    counter!("metering_events_applied_total").increment(1);
}

pub fn event_duplicate() {
    counter!("metering_events_duplicate_total").increment(1);
}

/// `reason` is a `MeteringError::kind`
pub fn event_skipped(reason: &'static str) {
    counter!("metering_events_skipped_total", "reason" => reason).increment(1);
}

pub fn rollover_completed() {
    counter!("metering_rollovers_total").increment(1);
}

pub fn rollover_failed() {
    counter!("metering_rollover_failures_total").increment(1);
}

pub fn exchange_rate_fallback() {
    counter!("metering_exchange_rate_fallback_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_metrics_install_nothing() {
        let handle = init_metrics(&MetricsConfig::default()).unwrap();
        assert!(handle.is_none());

        // no recorder: recording is a no-op
        event_applied();
        event_skipped("invalid_input");
    }
}
