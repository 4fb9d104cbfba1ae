//! # Dispatcher
//! Sends every chunk to the categorizer concurrently and waits for all calls to
//! settle before anything downstream runs.
//!
//! Calls are polled on the caller's task (`join_all`), so "concurrent" means many
//! outstanding requests, not parallel threads. Each call returns its own result;
//! there is no shared accumulator. Results are reassembled by chunk index, never
//! by arrival order. A failed, malformed or timed-out call contributes nothing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::watch;

use crate::categorize::{CategorizerError, DynCategorizer, Taxonomy};
use crate::ingest::normalize_incoming;
use crate::model::{ProcessingProgress, RawRow, Transaction};

/// Observable `{current, total}` of the dispatch in flight.
///
/// Updates go through `watch::Sender::send_modify`, so simultaneous completions
/// never lose an increment. Readers poll [`snapshot`](Self::snapshot) or await
/// changes on a [`subscribe`](Self::subscribe)d receiver.
#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<ProcessingProgress>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProcessingProgress::default());
        Self { tx }
    }

    pub fn start(&self, total: usize) {
        self.tx.send_replace(ProcessingProgress { current: 0, total });
    }

    pub fn advance(&self) {
        self.tx.send_modify(|p| {
            if p.current < p.total {
                p.current += 1;
            }
        });
    }

    pub fn reset(&self) {
        self.tx.send_replace(ProcessingProgress::default());
    }

    pub fn snapshot(&self) -> ProcessingProgress {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessingProgress> {
        self.tx.subscribe()
    }

    /// Guard that resets the tracker when dropped, including when the
    /// owning future is cancelled mid-dispatch.
    pub fn reset_on_drop(&self) -> ResetOnDrop<'_> {
        ResetOnDrop(self)
    }
}

#[must_use = "progress is reset as soon as the guard is dropped"]
pub struct ResetOnDrop<'a>(&'a ProgressTracker);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.reset();
    }
}

#[derive(Debug, Error)]
pub enum ChunkFailure {
    #[error(transparent)]
    Categorizer(#[from] CategorizerError),

    #[error("categorizer call timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug)]
pub struct ChunkResult {
    /// Position of the chunk in the upload.
    pub index: usize,
    /// Rows sent in this chunk.
    pub rows: usize,
    pub outcome: Result<Vec<Transaction>, ChunkFailure>,
}

/// Settled results of every chunk, in chunk order.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub chunks: Vec<ChunkResult>,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.chunks.len()
    }

    pub fn succeeded(&self) -> usize {
        self.chunks.iter().filter(|c| c.outcome.is_ok()).count()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| c.outcome.is_err())
            .map(|c| c.index)
            .collect()
    }

    pub fn all_failed(&self) -> bool {
        !self.chunks.is_empty() && self.succeeded() == 0
    }

    /// Successful chunk results concatenated in chunk order, then within-chunk order.
    pub fn into_transactions(self) -> Vec<Transaction> {
        self.chunks
            .into_iter()
            .filter_map(|c| c.outcome.ok())
            .flatten()
            .collect()
    }
}

pub struct Dispatcher {
    categorizer: DynCategorizer,
    taxonomy: Arc<Taxonomy>,
    call_timeout: Duration,
}

impl Dispatcher {
    pub fn new(categorizer: DynCategorizer, taxonomy: Arc<Taxonomy>, call_timeout: Duration) -> Self {
        Self {
            categorizer,
            taxonomy,
            call_timeout,
        }
    }

    pub fn categorizer_name(&self) -> &'static str {
        self.categorizer.name()
    }

    /// Issue all chunk calls at once and return when every one has settled.
    /// `progress.total` is fixed to the chunk count; `current` advances per settled call.
    pub async fn dispatch(&self, chunks: &[Vec<RawRow>], progress: &ProgressTracker) -> DispatchReport {
        progress.start(chunks.len());

        let calls = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| self.run_chunk(index, chunk, progress));
        let mut settled = join_all(calls).await;
        settled.sort_by_key(|c| c.index);

        DispatchReport { chunks: settled }
    }

    async fn run_chunk(&self, index: usize, chunk: &[RawRow], progress: &ProgressTracker) -> ChunkResult {
        let started = Instant::now();
        let call = self.categorizer.categorize(chunk, &self.taxonomy);
        let outcome = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(txs)) => Ok(normalize_incoming(txs)),
            Ok(Err(e)) => Err(ChunkFailure::Categorizer(e)),
            Err(_) => Err(ChunkFailure::TimedOut(self.call_timeout)),
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        counter!("dispatch_chunks_total").increment(1);
        histogram!("dispatch_chunk_ms").record(elapsed_ms);

        match &outcome {
            Ok(txs) => {
                if txs.len() != chunk.len() {
                    tracing::debug!(
                        target: "dispatch",
                        chunk = index,
                        rows = chunk.len(),
                        returned = txs.len(),
                        "categorizer changed cardinality"
                    );
                }
            }
            Err(e) => {
                counter!("dispatch_chunk_failures_total").increment(1);
                tracing::warn!(
                    target: "dispatch",
                    chunk = index,
                    rows = chunk.len(),
                    provider = self.categorizer.name(),
                    error = %e,
                    "chunk failed, contributing no transactions"
                );
            }
        }

        progress.advance();

        ChunkResult {
            index,
            rows: chunk.len(),
            outcome,
        }
    }
}
