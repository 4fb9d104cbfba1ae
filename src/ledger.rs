//! # Ledger store
//! The single owner of the cumulative ledger. Uploads go through
//! [`LedgerStore::apply_merge`], manual entries through
//! [`LedgerStore::add_manual`]; everything else reads a [`LedgerStore::snapshot`].
//!
//! A merge builds the complete next ledger off to the side, persists it, and only
//! then swaps the shared `Arc`. Readers hold either the old or the new ledger,
//! never a half-applied one.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use metrics::gauge;
use serde::Serialize;

use crate::model::{IdentityKey, Ledger, RawRow, Transaction};

/// Counts from one upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Incoming transactions with a new identity key.
    pub inserted: usize,
    /// Incoming transactions that replaced an entry with the same key.
    pub replaced: usize,
    /// Ledger size after the merge.
    pub total: usize,
}

/// Insert-or-replace by identity key.
///
/// Replaced entries keep their position; new keys are appended in incoming
/// order. When `incoming` repeats a key the later one wins. Applying the same
/// `incoming` twice yields the same list as applying it once.
pub fn upsert(existing: &[Transaction], incoming: Vec<Transaction>) -> (Vec<Transaction>, MergeReport) {
    let mut merged: Vec<Transaction> = Vec::with_capacity(existing.len() + incoming.len());
    let mut index: HashMap<IdentityKey, usize> = HashMap::with_capacity(existing.len());
    for t in existing {
        match index.get(&t.identity_key()) {
            Some(&pos) => merged[pos] = t.clone(),
            None => {
                index.insert(t.identity_key(), merged.len());
                merged.push(t.clone());
            }
        }
    }

    let mut report = MergeReport::default();
    for t in incoming {
        let key = t.identity_key();
        match index.get(&key) {
            Some(&pos) => {
                merged[pos] = t;
                report.replaced += 1;
            }
            None => {
                index.insert(key, merged.len());
                merged.push(t);
                report.inserted += 1;
            }
        }
    }
    report.total = merged.len();
    (merged, report)
}

pub struct LedgerStore {
    current: RwLock<Arc<Ledger>>,
    // Serializes read-modify-write cycles; readers never take it.
    writer: Mutex<()>,
    path: Option<PathBuf>,
    raw_rows: RwLock<Arc<Vec<RawRow>>>,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("path", &self.path)
            .field("transactions", &self.snapshot().len())
            .finish()
    }
}

impl LedgerStore {
    /// Memory-only store, starts empty.
    pub fn in_memory() -> Self {
        Self::with_ledger(Ledger::default(), None)
    }

    /// Load the ledger persisted at `path`, or start empty if the file does not exist.
    /// An unreadable or corrupt file is an error; it is never silently replaced.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ledger = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("reading ledger from {}", path.display()))?;
            let stored: Ledger = serde_json::from_str(&raw)
                .with_context(|| format!("parsing ledger at {}", path.display()))?;
            // Stored summaries are not trusted; duplicates collapse.
            let (transactions, _) = upsert(&[], stored.transactions);
            Ledger::from_transactions(transactions)
                .with_context(|| format!("summarizing ledger at {}", path.display()))?
        } else {
            Ledger::default()
        };
        tracing::info!(
            target: "ledger",
            path = %path.display(),
            transactions = ledger.len(),
            "ledger opened"
        );
        Ok(Self::with_ledger(ledger, Some(path)))
    }

    /// `Some(path)` → [`open`](Self::open), `None` → [`in_memory`](Self::in_memory).
    pub fn from_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::open(p),
            None => Ok(Self::in_memory()),
        }
    }

    fn with_ledger(ledger: Ledger, path: Option<PathBuf>) -> Self {
        gauge!("ledger_transactions").set(ledger.len() as f64);
        Self {
            current: RwLock::new(Arc::new(ledger)),
            writer: Mutex::new(()),
            path,
            raw_rows: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Arc<Ledger> {
        match self.current.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Upsert reconciled transactions and recompute the summary from scratch.
    /// On error (summary overflow, persistence) the visible ledger is unchanged.
    pub fn apply_merge(&self, incoming: Vec<Transaction>) -> Result<MergeReport> {
        let _w = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let base = self.snapshot();
        let (transactions, report) = upsert(&base.transactions, incoming);
        self.commit(Ledger::from_transactions(transactions)?)?;
        tracing::info!(
            target: "ledger",
            inserted = report.inserted,
            replaced = report.replaced,
            total = report.total,
            "merge applied"
        );
        Ok(report)
    }

    /// Manual entry; sign-normalized like ingested transactions.
    pub fn add_manual(&self, transaction: Transaction) -> Result<MergeReport> {
        self.apply_merge(vec![transaction.normalized()])
    }

    pub fn clear(&self) -> Result<()> {
        let _w = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        self.commit(Ledger::default())?;
        tracing::info!(target: "ledger", "ledger cleared");
        Ok(())
    }

    /// Keep the latest upload's rows for preview; replaces the previous set.
    pub fn set_raw_rows(&self, rows: Vec<RawRow>) {
        let mut g = self.raw_rows.write().unwrap_or_else(|p| p.into_inner());
        *g = Arc::new(rows);
    }

    pub fn raw_rows(&self) -> Arc<Vec<RawRow>> {
        match self.raw_rows.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    // Persist first, then publish.
    fn commit(&self, next: Ledger) -> Result<()> {
        if let Some(path) = &self.path {
            write_atomic(path, &next)?;
        }
        let len = next.len();
        {
            let mut g = self.current.write().unwrap_or_else(|p| p.into_inner());
            *g = Arc::new(next);
        }
        gauge!("ledger_transactions").set(len as f64);
        Ok(())
    }
}

fn write_atomic(path: &Path, ledger: &Ledger) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(ledger).context("serializing ledger")?;
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(json.as_bytes())?;
    f.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
