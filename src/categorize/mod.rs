// src/categorize/mod.rs
//! Categorizer abstraction: an opaque remote call that turns raw statement rows
//! into labeled transactions, plus the concrete providers and the factory.

pub mod gemini;
pub mod openai;
pub mod taxonomy;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::config::CategorizerConfig;
use crate::model::{parse_day, RawRow, Transaction, TxType};

pub use gemini::GeminiCategorizer;
pub use openai::OpenAiCategorizer;
pub use taxonomy::{Label, Taxonomy};

#[derive(Error, Debug)]
pub enum CategorizerError {
    #[error("categorizer not configured: {0}")]
    NotConfigured(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("rate limited")]
    RateLimited,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Labels a chunk of raw rows. Implementations should return one transaction per
/// row but callers must not rely on it.
#[async_trait]
pub trait Categorizer: Send + Sync {
    async fn categorize(
        &self,
        rows: &[RawRow],
        taxonomy: &Taxonomy,
    ) -> Result<Vec<Transaction>, CategorizerError>;

    /// Provider name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynCategorizer = Arc<dyn Categorizer>;

/// Factory: build a categorizer according to config and environment variables.
///
/// * If `CATEGORIZER_TEST_MODE=mock`, returns the deterministic [`StaticCategorizer`].
/// * Else if `config.enabled == false`, returns [`DisabledCategorizer`].
/// * Else builds the configured remote provider.
pub fn build_categorizer(config: &CategorizerConfig) -> DynCategorizer {
    if std::env::var("CATEGORIZER_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(StaticCategorizer);
    }

    if !config.enabled {
        return Arc::new(DisabledCategorizer);
    }

    match config.provider.as_str() {
        "openai" => Arc::new(OpenAiCategorizer::new(
            config.api_key.clone(),
            config.model.as_deref(),
        )),
        "gemini" => Arc::new(GeminiCategorizer::new(
            config.api_key.clone(),
            config.model.as_deref(),
        )),
        other => {
            tracing::warn!(provider = other, "unknown categorizer provider, disabling");
            Arc::new(DisabledCategorizer)
        }
    }
}

// ------------------------------------------------------------
// Prompt + response handling shared by the remote providers
// ------------------------------------------------------------

/// Instructions + taxonomy + the rows, serialized as pretty JSON.
pub fn build_prompt(rows: &[RawRow], taxonomy: &Taxonomy) -> String {
    let data = serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You categorize and structure bank statement rows. Categorize every row into \
         one category and one group from the lists below.\n\
         Respond with JSON only: {{\"transactions\": [{{\"amount\": number, \"description\": string, \
         \"category\": string, \"type\": \"EARNING\"|\"EXPENSE\", \"tags\": [string], \
         \"group\": string, \"date\": \"YYYY-MM-DD\"}}]}}.\n\
         The output must have the same length as the input.\n\
         Use the start of the day as the date; if a row has several dates use the earliest.\n\
         Negative amounts are expenses and positive amounts are earnings.\n\n\
         {}\n\n### Data to Analyze:\n{}",
        taxonomy.render(),
        data
    )
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PayloadAny {
    Wrapped { transactions: Vec<Transaction> },
    Bare(Vec<Transaction>),
}

/// Parse the model's text output. Tolerates markdown code fences and a bare array.
pub fn parse_transactions_payload(text: &str) -> Result<Vec<Transaction>, CategorizerError> {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if trimmed.is_empty() {
        return Err(CategorizerError::Malformed("empty response".to_string()));
    }
    let any: PayloadAny =
        serde_json::from_str(trimmed).map_err(|e| CategorizerError::Malformed(e.to_string()))?;
    Ok(match any {
        PayloadAny::Wrapped { transactions } => transactions,
        PayloadAny::Bare(v) => v,
    })
}

// ------------------------------------------------------------
// Local categorizers
// ------------------------------------------------------------

/// Always fails; used when categorization is disabled.
pub struct DisabledCategorizer;

#[async_trait]
impl Categorizer for DisabledCategorizer {
    async fn categorize(
        &self,
        _rows: &[RawRow],
        _taxonomy: &Taxonomy,
    ) -> Result<Vec<Transaction>, CategorizerError> {
        Err(CategorizerError::NotConfigured(
            "categorization is disabled".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic, offline categorizer for tests and local runs.
///
/// Reads the usual statement columns (case-insensitive), derives the type from the
/// amount sign and files everything under "Other". Rows without a parsable amount
/// are skipped.
pub struct StaticCategorizer;

const DATE_COLUMNS: &[&str] = &["date", "fecha", "booking date", "value date"];
const DESCRIPTION_COLUMNS: &[&str] = &["description", "descripción", "descripcion", "concept", "details"];
const AMOUNT_COLUMNS: &[&str] = &["amount", "importe", "value"];

fn column<'a>(row: &'a RawRow, names: &[&str]) -> Option<&'a serde_json::Value> {
    row.iter()
        .find(|(k, _)| names.iter().any(|n| k.trim().eq_ignore_ascii_case(n)))
        .map(|(_, v)| v)
}

fn cell_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.trim().to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// "1.234,56 €" / "-17.26" / 42 → Decimal
pub(crate) fn parse_amount_cell(v: &serde_json::Value) -> Option<Decimal> {
    use std::str::FromStr;
    let raw = cell_text(v);
    let mut s: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | ','))
        .collect();
    match (s.rfind(','), s.rfind('.')) {
        // "1.234,56"
        (Some(c), Some(d)) if c > d => s = s.replace('.', "").replace(',', "."),
        // "1,234.56"
        (Some(_), Some(_)) => s = s.replace(',', ""),
        (Some(_), None) => s = s.replace(',', "."),
        _ => {}
    }
    Decimal::from_str(&s).ok()
}

impl StaticCategorizer {
    pub fn categorize_row(row: &RawRow) -> Option<Transaction> {
        let amount = column(row, AMOUNT_COLUMNS).and_then(parse_amount_cell)?;
        let description = column(row, DESCRIPTION_COLUMNS)
            .map(cell_text)
            .unwrap_or_default();
        let date = column(row, DATE_COLUMNS).and_then(|v| parse_day(&cell_text(v)));
        let (tx_type, group, category) = if amount.is_sign_negative() {
            (TxType::Expense, "Expenses", "Other")
        } else {
            (TxType::Earning, "Earnings", "Income")
        };
        Some(Transaction::new(date, description, amount, tx_type).with_category(group, category))
    }
}

#[async_trait]
impl Categorizer for StaticCategorizer {
    async fn categorize(
        &self,
        rows: &[RawRow],
        _taxonomy: &Taxonomy,
    ) -> Result<Vec<Transaction>, CategorizerError> {
        Ok(rows.iter().filter_map(Self::categorize_row).collect())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: serde_json::Value) -> RawRow {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn payload_parser_accepts_wrapped_bare_and_fenced() {
        let wrapped = r#"{"transactions":[{"amount":-5,"description":"a","type":"EXPENSE","date":"2024-01-02"}]}"#;
        assert_eq!(parse_transactions_payload(wrapped).unwrap().len(), 1);

        let bare = r#"[{"amount":5,"type":"EARNING"},{"amount":-1,"type":"EXPENSE"}]"#;
        assert_eq!(parse_transactions_payload(bare).unwrap().len(), 2);

        let fenced = format!("```json\n{bare}\n```");
        assert_eq!(parse_transactions_payload(&fenced).unwrap().len(), 2);
    }

    #[test]
    fn payload_parser_rejects_garbage() {
        assert!(matches!(
            parse_transactions_payload("sorry, I can't"),
            Err(CategorizerError::Malformed(_))
        ));
        assert!(parse_transactions_payload("   ").is_err());
    }

    #[test]
    fn prompt_contains_rows_and_taxonomy() {
        let rows = vec![row(json!({"Fecha": "31 ene 2025", "Descripción": "MERCADONA"}))];
        let p = build_prompt(&rows, &Taxonomy::default());
        assert!(p.contains("MERCADONA"));
        assert!(p.contains("### Categories:"));
        assert!(p.contains("same length as the input"));
    }

    #[test]
    fn amount_cells_parse_common_formats() {
        assert_eq!(parse_amount_cell(&json!("-17,26 €")), Some(Decimal::new(-1726, 2)));
        assert_eq!(parse_amount_cell(&json!("1.234,50")), Some(Decimal::new(123450, 2)));
        assert_eq!(parse_amount_cell(&json!("1,234.50")), Some(Decimal::new(123450, 2)));
        assert_eq!(parse_amount_cell(&json!(-49.99)), Some(Decimal::new(-4999, 2)));
        assert_eq!(parse_amount_cell(&json!("n/a")), None);
    }

    #[tokio::test]
    async fn static_categorizer_maps_columns_and_skips_unusable_rows() {
        let rows = vec![
            row(json!({"Date": "2024-01-15", "Description": "Salary", "Amount": "2500"})),
            row(json!({"date": "2024-01-16", "description": "Coffee", "amount": -3.5})),
            row(json!({"note": "opening balance"})),
        ];
        let out = StaticCategorizer
            .categorize(&rows, &Taxonomy::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tx_type, TxType::Earning);
        assert_eq!(out[0].group, "Earnings");
        assert_eq!(out[1].tx_type, TxType::Expense);
        assert_eq!(out[1].description, "Coffee");
    }

    #[tokio::test]
    async fn disabled_categorizer_errors() {
        let res = DisabledCategorizer.categorize(&[], &Taxonomy::default()).await;
        assert!(matches!(res, Err(CategorizerError::NotConfigured(_))));
    }
}
