use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Lifecycle metrics (request-driven) ──────────────────────────

/// Counter: claims created. Labels: kind.
pub const CLAIMS_CREATED_TOTAL: &str = "motorpool_claims_created_total";

/// Counter: writes refused because of an overlapping claim. Labels: with.
pub const CONFLICTS_TOTAL: &str = "motorpool_conflicts_total";

/// Counter: committed claim status transitions. Labels: kind, to.
pub const TRANSITIONS_TOTAL: &str = "motorpool_transitions_total";

/// Counter: changes of a resource's cached status. Labels: to.
pub const RESOURCE_STATUS_CHANGES_TOTAL: &str = "motorpool_resource_status_changes_total";

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: full reconcile sweeps.
pub const RECONCILE_RUNS_TOTAL: &str = "motorpool_reconcile_runs_total";

/// Counter: resources whose reconciliation failed during a sweep.
pub const RECONCILE_FAILURES_TOTAL: &str = "motorpool_reconcile_failures_total";

/// Histogram: sweep duration in seconds.
pub const RECONCILE_DURATION_SECONDS: &str = "motorpool_reconcile_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: registered resources.
pub const RESOURCES_REGISTERED: &str = "motorpool_resources_registered";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "motorpool_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "motorpool_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_exporter_is_noop() {
        assert!(init(None).is_ok());
    }

    #[test]
    fn metric_names_are_namespaced() {
        for name in [
            CLAIMS_CREATED_TOTAL,
            CONFLICTS_TOTAL,
            TRANSITIONS_TOTAL,
            RESOURCE_STATUS_CHANGES_TOTAL,
            RECONCILE_RUNS_TOTAL,
            RECONCILE_FAILURES_TOTAL,
            RECONCILE_DURATION_SECONDS,
            RESOURCES_REGISTERED,
            WAL_FLUSH_DURATION_SECONDS,
            WAL_FLUSH_BATCH_SIZE,
        ] {
            assert!(name.starts_with("motorpool_"), "{name}");
        }
    }
}
