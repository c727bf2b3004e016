// tests/metrics.rs
mod common;

use channel_digest::error::PipelineError;
use common::*;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn run_summary_and_retries_are_exported() {
    // Install a local recorder for the test
    let handle = PrometheusBuilder::new().install_recorder().expect("recorder");

    let h = Harness::new(vec![launch(1), noise(2)]);
    h.source
        .connect_errors
        .lock()
        .push_back(PipelineError::TransientNetwork("reset".into()));
    let p = h.pipeline();

    let first = p.run_exclusive(&CancellationToken::new()).await.expect("not busy");
    assert!(first.success);

    let out = handle.render();
    for needle in [
        "pipeline_runs_total",
        "outcome=\"success\"",
        "pipeline_phase_items_total",
        "phase=\"classifying\"",
        "pipeline_phase_ms",
        "pipeline_last_run_ts",
        "retry_attempts_total",
        "op=\"source.connect\"",
    ] {
        assert!(out.contains(needle), "metrics exposition missing '{needle}'\n{out}");
    }
}
