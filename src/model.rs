//! # Data Model
//! Raw statement rows, categorized transactions, identity keys, the ledger
//! (summary + transactions) and dispatch progress.
//!
//! Amounts are exact decimals so identity comparison and summary totals never
//! drift. Dates are calendar days; any time-of-day is dropped while parsing.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One parsed statement row: column name → cell value.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Tag written onto both members of a reversal pair.
pub const CANCELLED_TAG: &str = "cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TxType {
    Earning,
    Expense,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Earning => "EARNING",
            TxType::Expense => "EXPENSE",
        }
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EARNING" | "EARNINGS" | "INCOME" => Ok(TxType::Earning),
            "EXPENSE" | "EXPENSES" => Ok(TxType::Expense),
            other => anyhow::bail!("unknown transaction type: {other}"),
        }
    }
}

impl<'de> Deserialize<'de> for TxType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A categorized transaction, as returned by the categorizer and stored in the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub amount: Decimal,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub description: String,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub category: String,
    #[serde(rename = "type")]
    pub tx_type: TxType,
    #[serde(default, deserialize_with = "de_lenient_tags")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "de_lenient_string")]
    pub group: String,
    #[serde(default, deserialize_with = "de_day")]
    pub date: Option<NaiveDate>,
}

impl Transaction {
    pub fn new(
        date: Option<NaiveDate>,
        description: impl Into<String>,
        amount: Decimal,
        tx_type: TxType,
    ) -> Self {
        Self {
            amount,
            description: description.into(),
            category: String::new(),
            tx_type,
            tags: Vec::new(),
            group: String::new(),
            date,
        }
    }

    pub fn with_category(mut self, group: impl Into<String>, category: impl Into<String>) -> Self {
        self.group = group.into();
        self.category = category.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            date: self.date,
            description: self.description.clone(),
            amount: self.amount.normalize(),
        }
    }

    /// Absolute value of the amount, scale-normalized.
    pub fn magnitude(&self) -> Decimal {
        self.amount.abs().normalize()
    }

    /// Applies the ledger sign convention: earnings positive, expenses negative.
    pub fn normalized(mut self) -> Self {
        self.amount = match self.tx_type {
            TxType::Earning => self.amount.abs(),
            TxType::Expense => -self.amount.abs(),
        };
        self
    }

    pub fn is_earning(&self) -> bool {
        self.tx_type == TxType::Earning
    }
}

// Tags compare as a set; their order only matters for display.
impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.amount == other.amount
            && self.description == other.description
            && self.category == other.category
            && self.tx_type == other.tx_type
            && self.group == other.group
            && self.date == other.date
            && self.tags.iter().collect::<BTreeSet<_>>() == other.tags.iter().collect::<BTreeSet<_>>()
    }
}

/// Same real-world event ⇔ same (date, description, amount).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    pub date: Option<NaiveDate>,
    pub description: String,
    pub amount: Decimal,
}

/// A running total left the representable `Decimal` range.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("amount overflow: {side} total exceeds the representable range")]
pub struct AmountOverflow {
    pub side: &'static str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub total_earnings: Decimal,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub total_expenses: Decimal,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    pub net_amount: Decimal,
}

impl Summary {
    /// Recomputed from scratch; expenses accumulate as a positive magnitude.
    pub fn compute(transactions: &[Transaction]) -> Result<Self, AmountOverflow> {
        let mut total_earnings = Decimal::ZERO;
        let mut total_expenses = Decimal::ZERO;
        for t in transactions {
            match t.tx_type {
                TxType::Earning => {
                    total_earnings = total_earnings
                        .checked_add(t.amount)
                        .ok_or(AmountOverflow { side: "earnings" })?;
                }
                TxType::Expense => {
                    total_expenses = total_expenses
                        .checked_add(t.amount.abs())
                        .ok_or(AmountOverflow { side: "expenses" })?;
                }
            }
        }
        let net_amount = total_earnings
            .checked_sub(total_expenses)
            .ok_or(AmountOverflow { side: "net" })?;
        Ok(Self {
            total_earnings,
            total_expenses,
            net_amount,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    pub summary: Summary,
    pub transactions: Vec<Transaction>,
}

impl Ledger {
    pub fn from_transactions(transactions: Vec<Transaction>) -> Result<Self, AmountOverflow> {
        Ok(Self {
            summary: Summary::compute(&transactions)?,
            transactions,
        })
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Chunk-level progress of the dispatch currently in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingProgress {
    pub current: usize,
    pub total: usize,
}

impl ProcessingProgress {
    pub fn is_active(&self) -> bool {
        self.total > 0
    }
}

// ------------------------------------------------------------
// Lenient field parsing
// ------------------------------------------------------------

/// Parse a calendar day from the formats statement sources and categorizers emit.
/// Any time component is discarded (start of day).
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%d/%m/%Y", "%Y/%m/%d", "%d.%m.%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    // "2024-01-15T..." with an offset chrono doesn't accept
    s.get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

fn de_day<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_day))
}

fn de_lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn de_lenient_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
