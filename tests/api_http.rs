// tests/api_http.rs
use std::sync::Arc;

use axum::body::{self, Body};
use axum::Router;
use http::{Request, StatusCode};
use serde_json::{json, Value};
use statement_analyzer::categorize::{DisabledCategorizer, StaticCategorizer};
use statement_analyzer::{build_router, DynCategorizer, Pipeline, PipelineConfig};
use tower::ServiceExt;

fn app_with(categorizer: DynCategorizer) -> Router {
    let cfg = PipelineConfig {
        ledger_path: None,
        chunk_size: 2,
        ..PipelineConfig::default()
    };
    let pipeline = Arc::new(Pipeline::from_config(cfg, categorizer).expect("pipeline"));
    build_router(pipeline).expect("router")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    // axum::body::to_bytes requires an explicit limit
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let v = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, v)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn statement() -> Value {
    json!([
        {"Date": "2024-01-15", "Description": "Salary", "Amount": "2500,00"},
        {"Date": "2024-01-02", "Description": "Rent", "Amount": "-900"},
        {"Date": "2024-02-03", "Description": "Coffee", "Amount": "-3.50"},
        {"Date": "2024-02-04", "Description": "Prefunding transfer", "Amount": "-100"}
    ])
}

#[tokio::test]
async fn health_is_ok() {
    let app = app_with(Arc::new(StaticCategorizer));
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn upload_then_read_ledger_months_and_rollup() {
    let app = app_with(Arc::new(StaticCategorizer));

    let (status, body) = send(&app, post_json("/upload", statement())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "complete");
    assert_eq!(body["report"]["noise_dropped"], 1);
    assert_eq!(body["report"]["merge"]["inserted"], 3);

    let (_, ledger) = send(&app, get("/ledger")).await;
    assert_eq!(ledger["transactions"].as_array().unwrap().len(), 3);
    assert_eq!(ledger["summary"]["totalEarnings"], 2500.0);
    assert_eq!(ledger["summary"]["totalExpenses"], 903.5);
    assert_eq!(ledger["summary"]["netAmount"], 1596.5);

    let (_, months) = send(&app, get("/months")).await;
    let keys: Vec<&str> = months
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["2024-2", "2024-1"]);
    assert_eq!(months[1]["in"].as_array().unwrap().len(), 1);
    assert_eq!(months[1]["out"].as_array().unwrap().len(), 1);
    assert_eq!(months[1]["inTotal"], 2500.0);
    assert_eq!(months[1]["outTotal"], 900.0);

    let (_, latest) = send(&app, get("/months?index=0")).await;
    assert_eq!(latest.as_array().unwrap().len(), 1);
    assert_eq!(latest[0]["key"], "2024-2");
    let (_, past_end) = send(&app, get("/months?index=9")).await;
    assert_eq!(past_end[0]["key"], "2024-1");
    let (_, before_start) = send(&app, get("/months?index=-3")).await;
    assert_eq!(before_start[0]["key"], "2024-2");

    let (_, jan_only) = send(&app, get("/months?from=2024-01-01&to=2024-01-31")).await;
    assert_eq!(jan_only.as_array().unwrap().len(), 1);

    let (status, rollup) = send(&app, get("/months/2024-01/rollup")).await;
    assert_eq!(status, StatusCode::OK);
    let groups: Vec<&str> = rollup
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["group"].as_str().unwrap())
        .collect();
    assert_eq!(groups, vec!["Earnings", "Expenses"]);
    assert_eq!(rollup[1]["total"], -900.0);

    let (_, rows) = send(&app, get("/rows")).await;
    assert_eq!(rows.as_array().unwrap().len(), 4);

    let (_, progress) = send(&app, get("/progress")).await;
    assert_eq!(progress, json!({"current": 0, "total": 0}));
}

#[tokio::test]
async fn manual_entry_and_clear() {
    let app = app_with(Arc::new(StaticCategorizer));
    let tx = json!({
        "amount": 12.5,
        "description": "Cash lunch",
        "category": "Dining",
        "type": "expense",
        "group": "Expenses",
        "date": "2024-03-01"
    });
    let (status, report) = send(&app, post_json("/transactions", tx)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(report["inserted"], 1);

    let (_, ledger) = send(&app, get("/ledger")).await;
    assert_eq!(ledger["transactions"][0]["amount"], -12.5);
    assert_eq!(ledger["transactions"][0]["type"], "EXPENSE");

    let req = Request::delete("/ledger").body(Body::empty()).unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, ledger) = send(&app, get("/ledger")).await;
    assert!(ledger["transactions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn manual_entry_outside_taxonomy_is_rejected() {
    let app = app_with(Arc::new(StaticCategorizer));
    let tx = |category: &str, group: &str| {
        json!({
            "amount": 3,
            "description": format!("cash {category}"),
            "type": "EXPENSE",
            "category": category,
            "group": group
        })
    };
    let (status, body) = send(&app, post_json("/transactions", tx("Crypto", "Expenses"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Crypto"));
    let (status, _) = send(&app, post_json("/transactions", tx("Taxes", "Fun money"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    // extra categories and case-insensitive names are fine; so is leaving both blank
    let (status, _) = send(&app, post_json("/transactions", tx("taxes", "necessary expenses"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, post_json("/transactions", tx("", ""))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, ledger) = send(&app, get("/ledger")).await;
    assert_eq!(ledger["transactions"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn summary_overflow_is_unprocessable_not_a_panic() {
    let app = app_with(Arc::new(StaticCategorizer));
    let huge = |desc: &str| {
        json!({"amount": "50000000000000000000000000000", "description": desc, "type": "EARNING"})
    };
    let (status, _) = send(&app, post_json("/transactions", huge("a"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(&app, post_json("/transactions", huge("b"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("amount overflow"));

    let (_, ledger) = send(&app, get("/ledger")).await;
    assert_eq!(ledger["transactions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_upload_maps_to_bad_gateway() {
    let app = app_with(Arc::new(DisabledCategorizer));
    let (status, body) = send(&app, post_json("/upload", statement())).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("ledger unchanged"));
}

#[tokio::test]
async fn bad_query_and_unknown_month() {
    let app = app_with(Arc::new(StaticCategorizer));
    let (status, _) = send(&app, get("/months?from=someday")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/months/2024-13/rollup")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/months/2030-1/rollup")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_endpoint_exposes_pipeline_series() {
    let app = app_with(Arc::new(StaticCategorizer));
    send(&app, post_json("/upload", statement())).await;

    let resp = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    for needle in ["dispatch_chunks_total", "ledger_transactions", "reconcile_noise_dropped_total"] {
        assert!(text.contains(needle), "missing {needle} in /metrics output");
    }
}
