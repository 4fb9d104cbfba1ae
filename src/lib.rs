// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod categorize;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod view;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::categorize::{build_categorizer, Categorizer, CategorizerError, DynCategorizer, Taxonomy};
pub use crate::config::{CategorizerConfig, PipelineConfig};
pub use crate::error::PipelineError;
pub use crate::ledger::{LedgerStore, MergeReport};
pub use crate::model::{AmountOverflow, Ledger, ProcessingProgress, RawRow, Summary, Transaction, TxType};
pub use crate::pipeline::{Pipeline, UploadOutcome, UploadReport};

use std::sync::Arc;

use axum::Router;

/// Full HTTP app for a given pipeline: API routes plus `/metrics`.
pub fn build_router(pipeline: Arc<Pipeline>) -> anyhow::Result<Router> {
    let metrics = crate::metrics::Metrics::init()?;
    Ok(create_router(AppState { pipeline }).merge(metrics.router()))
}

/// Build the app from the environment: pipeline config, categorizer config, ledger file.
pub async fn app() -> anyhow::Result<Router> {
    let config = PipelineConfig::load_default()?;
    let categorizer = build_categorizer(&CategorizerConfig::load_or_default()?);
    tracing::info!(
        provider = categorizer.name(),
        chunk_size = config.chunk_size,
        call_timeout_secs = config.call_timeout_secs,
        "building statement analyzer"
    );
    let pipeline = Arc::new(Pipeline::from_config(config, categorizer)?);
    match pipeline.ledger().path() {
        Some(path) => tracing::info!(ledger = %path.display(), "ledger persisted to file"),
        None => tracing::warn!("no ledger path configured; ledger is memory-only"),
    }
    build_router(pipeline)
}
