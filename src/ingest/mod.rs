// src/ingest/mod.rs
//! Ingestion side of the pipeline: splitting uploaded rows into bounded chunks
//! and normalizing what the categorizer hands back.

use crate::model::{RawRow, Transaction};
use sha2::{Digest, Sha256};

/// Rows per categorizer call unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// Split rows into ordered chunks of at most `chunk_size` rows.
///
/// Concatenating the chunks reproduces `rows` exactly. Empty input yields no
/// chunks. A `chunk_size` of 0 falls back to [`DEFAULT_CHUNK_SIZE`].
pub fn chunk_rows(rows: &[RawRow], chunk_size: usize) -> Vec<Vec<RawRow>> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    rows.chunks(size).map(|c| c.to_vec()).collect()
}

/// Sign normalization, applied exactly once as transactions enter the pipeline.
pub fn normalize_incoming(transactions: Vec<Transaction>) -> Vec<Transaction> {
    transactions.into_iter().map(Transaction::normalized).collect()
}

/// Short stable fingerprint of an upload, for logs. Never log raw rows.
pub fn upload_fingerprint(rows: &[RawRow]) -> String {
    let mut hasher = Sha256::new();
    for row in rows {
        hasher.update(serde_json::Value::Object(row.clone()).to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex_prefix(&hasher.finalize(), 6)
}

/// Anonymized id for a free-text field (descriptions are personal data).
pub(crate) fn anon_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex_prefix(&hasher.finalize(), 6)
}

fn hex_prefix(digest: &[u8], bytes: usize) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes * 2);
    for b in digest.iter().take(bytes) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}
