//! # Upload pipeline
//! `rows → chunk → dispatch (concurrent, joined) → reconcile → merge`.
//!
//! One upload runs at a time. The ledger is written at most once per upload,
//! after every chunk call has settled, and not at all when every chunk failed.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use metrics::gauge;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::categorize::{DynCategorizer, Taxonomy};
use crate::config::PipelineConfig;
use crate::dispatch::{Dispatcher, ProgressTracker};
use crate::error::PipelineError;
use crate::ingest::{anon_hash, chunk_rows, upload_fingerprint};
use crate::ledger::{LedgerStore, MergeReport};
use crate::model::{ProcessingProgress, RawRow};
use crate::reconcile::Reconciler;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadReport {
    pub rows: usize,
    pub chunks_total: usize,
    /// Indices (0-based) of chunks that contributed nothing.
    pub failed_chunks: Vec<usize>,
    /// Transactions returned by the successful chunks.
    pub received: usize,
    pub noise_dropped: usize,
    pub cancelled: usize,
    pub merge: MergeReport,
    /// Progress as it stood when the join completed.
    pub progress: ProcessingProgress,
}

/// Result of an upload that reached the ledger (or had nothing to do).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "report", rename_all = "snake_case")]
pub enum UploadOutcome {
    Complete(UploadReport),
    /// Some chunks failed; only the successful ones were merged.
    Partial(UploadReport),
}

impl UploadOutcome {
    pub fn report(&self) -> &UploadReport {
        match self {
            UploadOutcome::Complete(r) | UploadOutcome::Partial(r) => r,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, UploadOutcome::Partial(_))
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    taxonomy: Arc<Taxonomy>,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    ledger: Arc<LedgerStore>,
    progress: Arc<ProgressTracker>,
    upload_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, categorizer: DynCategorizer, ledger: Arc<LedgerStore>) -> Self {
        let taxonomy = Arc::new(Taxonomy::default());
        let dispatcher = Dispatcher::new(categorizer, Arc::clone(&taxonomy), config.call_timeout());
        let reconciler = Reconciler::new(&config.noise_markers, config.cancellation_matching);
        Self {
            config,
            taxonomy,
            dispatcher,
            reconciler,
            ledger,
            progress: Arc::new(ProgressTracker::new()),
            upload_lock: Mutex::new(()),
        }
    }

    /// Opens the configured ledger (file or memory) and wires everything up.
    pub fn from_config(config: PipelineConfig, categorizer: DynCategorizer) -> Result<Self> {
        let ledger = Arc::new(LedgerStore::from_path(config.ledger_path.as_deref())?);
        Ok(Self::new(config, categorizer, ledger))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Categories and groups the categorizer is prompted with.
    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    pub async fn process_upload(&self, rows: Vec<RawRow>) -> Result<UploadOutcome, PipelineError> {
        let _guard = self.upload_lock.lock().await;
        let started = Instant::now();
        let fingerprint = upload_fingerprint(&rows);

        self.ledger.set_raw_rows(rows.clone());

        if rows.is_empty() {
            tracing::info!(target: "pipeline", upload = %fingerprint, "empty upload, nothing to do");
            return Ok(UploadOutcome::Complete(UploadReport {
                merge: MergeReport {
                    total: self.ledger.snapshot().len(),
                    ..MergeReport::default()
                },
                ..UploadReport::default()
            }));
        }

        let chunks = chunk_rows(&rows, self.config.chunk_size);
        tracing::info!(
            target: "pipeline",
            upload = %fingerprint,
            rows = rows.len(),
            chunks = chunks.len(),
            provider = self.dispatcher.categorizer_name(),
            matching = ?self.reconciler.matching(),
            "upload started"
        );

        let reset = self.progress.reset_on_drop();
        let report = self.dispatcher.dispatch(&chunks, &self.progress).await;
        let progress = self.progress.snapshot();
        drop(reset);

        let chunks_total = report.total();
        let failed_chunks = report.failed_indices();
        if report.all_failed() {
            tracing::error!(
                target: "pipeline",
                upload = %fingerprint,
                chunks = chunks_total,
                "every chunk failed, ledger left unchanged"
            );
            return Err(PipelineError::AllChunksFailed { chunks: chunks_total });
        }

        let received_txs = report.into_transactions();
        let received = received_txs.len();
        let rec = self.reconciler.reconcile(received_txs);
        for t in &rec.cancelled {
            tracing::debug!(
                target: "pipeline",
                desc = %anon_hash(&t.description),
                amount = %t.amount,
                "cancelled reversal removed"
            );
        }

        let merge = self
            .ledger
            .apply_merge(rec.transactions)
            .map_err(PipelineError::Ledger)?;

        gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);

        let report = UploadReport {
            rows: rows.len(),
            chunks_total,
            failed_chunks,
            received,
            noise_dropped: rec.noise_dropped,
            cancelled: rec.cancelled.len(),
            merge,
            progress,
        };
        tracing::info!(
            target: "pipeline",
            upload = %fingerprint,
            received = report.received,
            noise_dropped = report.noise_dropped,
            cancelled = report.cancelled,
            inserted = report.merge.inserted,
            replaced = report.merge.replaced,
            failed_chunks = report.failed_chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upload finished"
        );

        if report.failed_chunks.is_empty() {
            Ok(UploadOutcome::Complete(report))
        } else {
            tracing::warn!(
                target: "pipeline",
                upload = %fingerprint,
                failed = ?report.failed_chunks,
                "partial upload: some chunks contributed nothing"
            );
            Ok(UploadOutcome::Partial(report))
        }
    }
}
