use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::ledger::MergeReport;
use crate::model::{parse_day, AmountOverflow, Ledger, ProcessingProgress, RawRow, Transaction};
use crate::pipeline::{Pipeline, UploadOutcome};
use crate::view::{self, DateRange, GroupRollup, MonthBucket, MonthKey};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/upload", post(upload))
        .route("/ledger", get(get_ledger).delete(clear_ledger))
        .route("/transactions", post(add_transaction))
        .route("/progress", get(get_progress))
        .route("/rows", get(get_rows))
        .route("/months", get(list_months))
        .route("/months/{key}/rollup", get(month_rollup))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Pipeline(PipelineError::AllChunksFailed { .. }) => StatusCode::BAD_GATEWAY,
            ApiError::Pipeline(PipelineError::Ledger(e)) | ApiError::Internal(e)
                if e.is::<AmountOverflow>() =>
            {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Pipeline(PipelineError::Ledger(_)) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(target: "api", error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn upload(
    State(state): State<AppState>,
    Json(rows): Json<Vec<RawRow>>,
) -> Result<Json<UploadOutcome>, ApiError> {
    let outcome = state.pipeline.process_upload(rows).await?;
    Ok(Json(outcome))
}

async fn get_ledger(State(state): State<AppState>) -> Json<Ledger> {
    Json(state.pipeline.ledger().snapshot().as_ref().clone())
}

async fn clear_ledger(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.pipeline.ledger().clear()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_transaction(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> Result<(StatusCode, Json<MergeReport>), ApiError> {
    let taxonomy = state.pipeline.taxonomy();
    let category = tx.category.trim();
    if !category.is_empty() && !taxonomy.is_known_category(category) {
        return Err(ApiError::BadRequest(format!("unknown category: {category}")));
    }
    let group = tx.group.trim();
    if !group.is_empty() && !taxonomy.is_known_group(group) {
        return Err(ApiError::BadRequest(format!("unknown group: {group}")));
    }
    let report = state.pipeline.ledger().add_manual(tx)?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn get_progress(State(state): State<AppState>) -> Json<ProcessingProgress> {
    Json(state.pipeline.progress().snapshot())
}

async fn get_rows(State(state): State<AppState>) -> Json<Vec<RawRow>> {
    Json(state.pipeline.ledger().raw_rows().as_ref().clone())
}

#[derive(Deserialize)]
struct MonthsQuery {
    from: Option<String>,
    to: Option<String>,
    /// Navigate to one month: 0 is the most recent, out-of-range values clamp.
    index: Option<isize>,
}

impl MonthsQuery {
    fn to_range(&self) -> Result<DateRange, ApiError> {
        let day = |raw: &Option<String>, name: &str| -> Result<_, ApiError> {
            match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                None => Ok(None),
                Some(s) => parse_day(s)
                    .map(Some)
                    .ok_or_else(|| ApiError::BadRequest(format!("invalid `{name}` date: {s}"))),
            }
        };
        Ok(DateRange {
            from: day(&self.from, "from")?,
            to: day(&self.to, "to")?,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MonthOut {
    #[serde(flatten)]
    bucket: MonthBucket,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    in_total: Decimal,
    #[serde(serialize_with = "rust_decimal::serde::float::serialize")]
    out_total: Decimal,
}

async fn list_months(
    State(state): State<AppState>,
    Query(q): Query<MonthsQuery>,
) -> Result<Json<Vec<MonthOut>>, ApiError> {
    let range = q.to_range()?;
    let ledger = state.pipeline.ledger().snapshot();
    let filtered = view::filter_by_range(&ledger.transactions, range);
    let mut buckets = view::month_buckets(&filtered);
    if let Some(index) = q.index.filter(|_| !buckets.is_empty()) {
        let at = view::clamp_month_index(index, buckets.len());
        buckets = vec![buckets.swap_remove(at)];
    }
    let out = buckets
        .into_iter()
        .map(|bucket| MonthOut {
            in_total: bucket.in_total(),
            out_total: bucket.out_total(),
            bucket,
        })
        .collect();
    Ok(Json(out))
}

/// `key` is a month (`2024-1`, `2024-01`) or `undated`.
async fn month_rollup(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<GroupRollup>>, ApiError> {
    let wanted: Option<MonthKey> = if key.eq_ignore_ascii_case("undated") {
        None
    } else {
        Some(key.parse().map_err(|e: anyhow::Error| ApiError::BadRequest(e.to_string()))?)
    };
    let ledger = state.pipeline.ledger().snapshot();
    let buckets = view::month_buckets(&ledger.transactions);
    let bucket = buckets
        .iter()
        .find(|b| b.key == wanted)
        .ok_or_else(|| ApiError::NotFound(format!("no transactions for month {key}")))?;
    Ok(Json(view::rollup(bucket.combined())))
}
