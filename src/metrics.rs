use anyhow::Context;
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

// The recorder is process-global; routers built later share the same handle.
static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();
static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register help text for every series the pipeline emits (once per process).
pub fn ensure_metrics_described() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("dispatch_chunks_total", "Categorizer chunk calls settled");
        describe_counter!(
            "dispatch_chunk_failures_total",
            "Chunk calls that failed, were malformed or timed out"
        );
        describe_histogram!(
            "dispatch_chunk_ms",
            Unit::Milliseconds,
            "Latency of a single categorizer chunk call"
        );
        describe_counter!(
            "reconcile_noise_dropped_total",
            "Transactions dropped as internal-transfer noise"
        );
        describe_counter!(
            "reconcile_cancelled_total",
            "Transactions removed as members of a reversal pair"
        );
        describe_gauge!("ledger_transactions", "Transactions currently in the ledger");
        describe_gauge!(
            "pipeline_last_run_ts",
            Unit::Seconds,
            "Unix time of the last upload that reached the ledger"
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (first call only) and describe the series.
    pub fn init() -> anyhow::Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                PrometheusBuilder::new()
                    .install_recorder()
                    .context("prometheus: install recorder")
            })?
            .clone();
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
