//! # Reconciler
//! Cleans the concatenated chunk results before they reach the ledger:
//!
//! 1. drop internal-transfer noise (description contains a noise marker, any case);
//! 2. stable-sort by description so pairing is deterministic;
//! 3. detect reversal pairs (same description, same magnitude, opposite type),
//!    tag them `cancelled` and remove them.
//!
//! Pair detection works on keys, not object identity: the set of
//! (description, magnitude) keys that have both an earning and an expense is
//! computed first, membership in that set decides removal.
//!
//! Reconciliation never fails on well-typed input.

use std::collections::{HashMap, HashSet};

use metrics::counter;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{Transaction, TxType, CANCELLED_TAG};

/// How reversal pairs are matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancellationMatching {
    /// Any transaction with at least one opposite-type partner is removed.
    /// Coarse: three transactions sharing a key may all go even though only two
    /// form a real reversal.
    #[default]
    Existential,
    /// Each expense cancels at most one earning (and vice versa), in description
    /// order. Unpaired leftovers stay.
    Pairwise,
}

/// Case-insensitive "description contains marker" test.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    re: Option<Regex>,
}

impl NoiseFilter {
    pub fn new<S: AsRef<str>>(markers: &[S]) -> Self {
        let alts: Vec<String> = markers
            .iter()
            .map(|m| m.as_ref().trim())
            .filter(|m| !m.is_empty())
            .map(regex::escape)
            .collect();
        if alts.is_empty() {
            return Self { re: None };
        }
        // Escaped literals always compile.
        let re = Regex::new(&format!("(?i)(?:{})", alts.join("|"))).ok();
        Self { re }
    }

    pub fn is_noise(&self, description: &str) -> bool {
        self.re.as_ref().is_some_and(|re| re.is_match(description))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// Surviving transactions in description order.
    pub transactions: Vec<Transaction>,
    /// Removed reversal members, tagged `cancelled`.
    pub cancelled: Vec<Transaction>,
    pub noise_dropped: usize,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    noise: NoiseFilter,
    matching: CancellationMatching,
}

type PairKey = (String, Decimal);

fn pair_key(t: &Transaction) -> PairKey {
    (t.description.clone(), t.magnitude())
}

impl Reconciler {
    pub fn new<S: AsRef<str>>(noise_markers: &[S], matching: CancellationMatching) -> Self {
        Self {
            noise: NoiseFilter::new(noise_markers),
            matching,
        }
    }

    pub fn matching(&self) -> CancellationMatching {
        self.matching
    }

    pub fn reconcile(&self, all: Vec<Transaction>) -> Reconciliation {
        // A) noise
        let before = all.len();
        let mut kept: Vec<Transaction> = all
            .into_iter()
            .filter(|t| !self.noise.is_noise(&t.description))
            .collect();
        let noise_dropped = before - kept.len();

        // B) canonical order (stable)
        kept.sort_by(|a, b| a.description.cmp(&b.description));

        // C) reversal pairs
        let cancel_mask = match self.matching {
            CancellationMatching::Existential => existential_mask(&kept),
            CancellationMatching::Pairwise => pairwise_mask(&kept),
        };

        let mut transactions = Vec::with_capacity(kept.len());
        let mut cancelled = Vec::new();
        for (mut t, is_cancelled) in kept.into_iter().zip(cancel_mask) {
            if is_cancelled {
                t.tags = vec![CANCELLED_TAG.to_string()];
                cancelled.push(t);
            } else {
                transactions.push(t);
            }
        }

        counter!("reconcile_noise_dropped_total").increment(noise_dropped as u64);
        counter!("reconcile_cancelled_total").increment(cancelled.len() as u64);
        tracing::debug!(
            target: "reconcile",
            kept = transactions.len(),
            cancelled = cancelled.len(),
            noise_dropped,
            matching = ?self.matching,
            "reconciled"
        );

        Reconciliation {
            transactions,
            cancelled,
            noise_dropped,
        }
    }
}

/// Cancelled ⇔ the (description, magnitude) key occurs with both types.
fn existential_mask(txs: &[Transaction]) -> Vec<bool> {
    let mut seen: HashMap<PairKey, (bool, bool)> = HashMap::new();
    for t in txs {
        let e = seen.entry(pair_key(t)).or_default();
        match t.tx_type {
            TxType::Earning => e.0 = true,
            TxType::Expense => e.1 = true,
        }
    }
    let cancelled_keys: HashSet<PairKey> = seen
        .into_iter()
        .filter(|(_, (earn, exp))| *earn && *exp)
        .map(|(k, _)| k)
        .collect();
    txs.iter()
        .map(|t| cancelled_keys.contains(&pair_key(t)))
        .collect()
}

/// One-to-one pairing per key: the first `min(earnings, expenses)` of each side go.
fn pairwise_mask(txs: &[Transaction]) -> Vec<bool> {
    let mut by_key: HashMap<PairKey, (Vec<usize>, Vec<usize>)> = HashMap::new();
    for (i, t) in txs.iter().enumerate() {
        let e = by_key.entry(pair_key(t)).or_default();
        match t.tx_type {
            TxType::Earning => e.0.push(i),
            TxType::Expense => e.1.push(i),
        }
    }
    let mut mask = vec![false; txs.len()];
    for (earnings, expenses) in by_key.values() {
        let pairs = earnings.len().min(expenses.len());
        for &i in earnings.iter().take(pairs).chain(expenses.iter().take(pairs)) {
            mask[i] = true;
        }
    }
    mask
}
