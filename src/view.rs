//! Read-only projections of the ledger for display: month buckets, date-range
//! filtering and group/category rollups. Always recomputed from a snapshot.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

use crate::model::{Transaction, TxType};

pub const UNCATEGORIZED: &str = "Uncategorized";

/// Calendar month, displayed as `2024-1` (month not zero-padded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = anyhow::Error;

    /// Accepts `2024-1` and `2024-01`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| anyhow!("month key must look like YYYY-M: {s}"))?;
        let year: i32 = y.parse().map_err(|_| anyhow!("bad year in month key: {s}"))?;
        let month: u32 = m.parse().map_err(|_| anyhow!("bad month in month key: {s}"))?;
        if !(1..=12).contains(&month) {
            bail!("month out of range in month key: {s}");
        }
        Ok(Self { year, month })
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One month of the projection. `key == None` holds undated transactions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthBucket {
    pub key: Option<MonthKey>,
    #[serde(rename = "in")]
    pub incoming: Vec<Transaction>,
    #[serde(rename = "out")]
    pub outgoing: Vec<Transaction>,
}

impl MonthBucket {
    fn new(key: Option<MonthKey>) -> Self {
        Self {
            key,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Totals saturate at the `Decimal` bounds instead of panicking.
    pub fn in_total(&self) -> Decimal {
        self.incoming
            .iter()
            .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.amount))
    }

    /// Sum of expense magnitudes.
    pub fn out_total(&self) -> Decimal {
        self.outgoing
            .iter()
            .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.amount.abs()))
    }

    /// `in` followed by `out`, for rollups.
    pub fn combined(&self) -> impl Iterator<Item = &Transaction> {
        self.incoming.iter().chain(self.outgoing.iter())
    }
}

/// Group by calendar month; most recent month first, undated bucket last.
/// Within a bucket `in`/`out` are sorted by date descending (stable).
pub fn month_buckets(transactions: &[Transaction]) -> Vec<MonthBucket> {
    use std::collections::BTreeMap;

    let mut dated: BTreeMap<MonthKey, MonthBucket> = BTreeMap::new();
    let mut undated = MonthBucket::new(None);
    for t in transactions {
        let bucket = match t.date {
            Some(d) => {
                let k = MonthKey::of(d);
                dated.entry(k).or_insert_with(|| MonthBucket::new(Some(k)))
            }
            None => &mut undated,
        };
        match t.tx_type {
            TxType::Earning => bucket.incoming.push(t.clone()),
            TxType::Expense => bucket.outgoing.push(t.clone()),
        }
    }

    let mut out: Vec<MonthBucket> = dated.into_values().rev().collect();
    for b in &mut out {
        b.incoming.sort_by(|a, b| b.date.cmp(&a.date));
        b.outgoing.sort_by(|a, b| b.date.cmp(&a.date));
    }
    if !undated.incoming.is_empty() || !undated.outgoing.is_empty() {
        out.push(undated);
    }
    out
}

/// Inclusive day range; either end may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// Undated transactions only pass an unbounded range.
    pub fn contains(&self, date: Option<NaiveDate>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(d) = date else {
            return false;
        };
        self.from.map_or(true, |f| d >= f) && self.to.map_or(true, |t| d <= t)
    }
}

pub fn filter_by_range(transactions: &[Transaction], range: DateRange) -> Vec<Transaction> {
    transactions
        .iter()
        .filter(|t| range.contains(t.date))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRollup {
    pub category: String,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub total: Decimal,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRollup {
    pub group: String,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub total: Decimal,
    pub categories: Vec<CategoryRollup>,
}

fn label_or_uncategorized(s: &str) -> String {
    let t = s.trim();
    if t.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        t.to_string()
    }
}

/// Group → category rollup with signed sums, in first-seen order.
pub fn rollup<'a, I>(transactions: I) -> Vec<GroupRollup>
where
    I: IntoIterator<Item = &'a Transaction>,
{
    let mut groups: Vec<GroupRollup> = Vec::new();
    for t in transactions {
        let group = label_or_uncategorized(&t.group);
        let category = label_or_uncategorized(&t.category);

        let gi = match groups.iter().position(|g| g.group == group) {
            Some(i) => i,
            None => {
                groups.push(GroupRollup {
                    group,
                    total: Decimal::ZERO,
                    categories: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let g = &mut groups[gi];
        g.total = g.total.saturating_add(t.amount);

        let ci = match g.categories.iter().position(|c| c.category == category) {
            Some(i) => i,
            None => {
                g.categories.push(CategoryRollup {
                    category,
                    total: Decimal::ZERO,
                    transactions: Vec::new(),
                });
                g.categories.len() - 1
            }
        };
        let c = &mut g.categories[ci];
        c.total = c.total.saturating_add(t.amount);
        c.transactions.push(t.clone());
    }
    groups
}

/// Clamp a navigation index into `0..len` (0 when empty).
pub fn clamp_month_index(index: isize, len: usize) -> usize {
    if len == 0 || index <= 0 {
        0
    } else {
        (index as usize).min(len - 1)
    }
}
