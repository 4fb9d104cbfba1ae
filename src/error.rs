use thiserror::Error;

/// Caller-visible failure of an upload. The ledger is unchanged whenever one is returned.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("all {chunks} chunk calls failed; ledger unchanged")]
    AllChunksFailed { chunks: usize },

    #[error("ledger update failed: {0:#}")]
    Ledger(#[source] anyhow::Error),
}
