// src/metrics.rs
use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;

use crate::error::{PipelineError, Result};

/// One-time metric descriptions so every series carries help text on scrape.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Finished pipeline runs by outcome.");
        describe_counter!(
            "pipeline_runs_skipped_total",
            "Triggers skipped because a run was in progress."
        );
        describe_counter!(
            "pipeline_phase_items_total",
            "Items per phase by outcome (succeeded/skipped/failed)."
        );
        describe_histogram!("pipeline_phase_ms", "Phase duration in milliseconds.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the last run finished.");
        describe_counter!("classifier_calls_total", "Classifier calls by outcome.");
        describe_gauge!("classifier_quota_used", "Classifier calls used today (UTC).");
        describe_counter!("retry_attempts_total", "Retried external calls by operation.");
        describe_counter!("scheduler_triggers_total", "Daily scheduler triggers.");
        describe_gauge!("scheduler_next_run_ts", "Unix ts of the next scheduled run.");
    });
}

/// Install the Prometheus recorder with its own HTTP listener. Needs a running
/// tokio runtime.
pub fn install_exporter(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| PipelineError::Config(format!("prometheus exporter on {addr}: {e}")))?;
    ensure_metrics_described();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
