//! Prometheus metrics for bucketkeeper.
//!
//! Installs a global Prometheus recorder with a standalone HTTP
//! exporter using `metrics-exporter-prometheus`, and defines the metric
//! name constants recorded by the reconciler and engine.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

// -- Metric name constants ----------------------------------------------------

/// Total reconciliation cycles (counter). Labels: action, outcome.
pub const RECONCILE_CYCLES_TOTAL: &str = "bucketkeeper_reconcile_cycles_total";

/// Reconciliation cycle duration in seconds (histogram). Labels: action.
pub const RECONCILE_DURATION_SECONDS: &str = "bucketkeeper_reconcile_duration_seconds";

/// Total objects removed during bucket purges (counter).
pub const OBJECTS_PURGED_TOTAL: &str = "bucketkeeper_objects_purged_total";

// -- Global recorder installation ---------------------------------------------

/// Install the global Prometheus recorder with an HTTP exporter bound
/// to `listen`.  Must be called from within a tokio runtime.
pub fn init_metrics(listen: &str) -> anyhow::Result<()> {
    let addr: std::net::SocketAddr = listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address `{listen}`: {e}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {e}"))?;

    Ok(())
}

/// Register metric descriptions with the global recorder.  Call once
/// after [`init_metrics`].
pub fn describe_metrics() {
    describe_counter!(
        RECONCILE_CYCLES_TOTAL,
        "Total reconciliation cycles by action and outcome"
    );
    describe_histogram!(
        RECONCILE_DURATION_SECONDS,
        "Reconciliation cycle duration in seconds"
    );
    describe_counter!(
        OBJECTS_PURGED_TOTAL,
        "Total objects removed during bucket purges"
    );
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_share_the_crate_prefix() {
        for name in [
            RECONCILE_CYCLES_TOTAL,
            RECONCILE_DURATION_SECONDS,
            OBJECTS_PURGED_TOTAL,
        ] {
            assert!(name.starts_with("bucketkeeper_"));
        }
    }

    #[test]
    fn test_init_metrics_rejects_bad_listen_address() {
        assert!(init_metrics("not-an-address").is_err());
    }
}
