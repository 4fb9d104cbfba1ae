// tests/categorizer_http.rs
// OpenAI and Gemini categorizers against a local stub server with canned responses.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use statement_analyzer::categorize::{GeminiCategorizer, OpenAiCategorizer, Taxonomy};
use statement_analyzer::{Categorizer, CategorizerError, Pipeline, PipelineConfig, RawRow, TxType};
use tokio::net::TcpListener;

const PAYLOAD: &str = r#"{"transactions": [{"amount": -4.2, "description": "Coffee", "category": "Dining",
"type": "EXPENSE", "tags": ["cafe"], "group": "Expenses", "date": "2024-03-02"}]}"#;

async fn openai(Path(scenario): Path<String>, headers: HeaderMap, Json(req): Json<Value>) -> Response {
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    if auth != Some("Bearer sk-test") {
        return (StatusCode::UNAUTHORIZED, "invalid api key").into_response();
    }
    if req["response_format"]["type"] != "json_object" || req["model"] != "gpt-4o-mini" {
        return (StatusCode::BAD_REQUEST, "unexpected request shape").into_response();
    }
    match scenario.as_str() {
        "ok" => Json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": PAYLOAD}}]
        }))
        .into_response(),
        "limited" => (StatusCode::TOO_MANY_REQUESTS, "slow down").into_response(),
        "broken" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response(),
        "empty" => Json(json!({ "choices": [] })).into_response(),
        "garbage" => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn gemini(
    Path((scenario, call)): Path<(String, String)>,
    Query(q): Query<HashMap<String, String>>,
    Json(req): Json<Value>,
) -> Response {
    if q.get("key").map(String::as_str) != Some("g-test") {
        return (StatusCode::FORBIDDEN, "API key not valid").into_response();
    }
    if call != "gemini-1.5-flash:generateContent"
        || req["generationConfig"]["responseMimeType"] != "application/json"
    {
        return (StatusCode::BAD_REQUEST, "unexpected request shape").into_response();
    }
    match scenario.as_str() {
        "ok" => Json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": format!("```json\n{PAYLOAD}\n```")}]},
                "finishReason": "STOP"
            }]
        }))
        .into_response(),
        "limited" => (StatusCode::TOO_MANY_REQUESTS, "quota").into_response(),
        "broken" => (StatusCode::SERVICE_UNAVAILABLE, "model overloaded").into_response(),
        "empty" => Json(json!({ "candidates": [] })).into_response(),
        "blocked" => Json(json!({ "candidates": [{ "finishReason": "SAFETY" }] })).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Starts the stub on an ephemeral port and returns its base URL.
async fn stub_server() -> String {
    let app = Router::new()
        .route("/openai/{scenario}", post(openai))
        .route("/gemini/{scenario}/models/{call}", post(gemini));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn rows() -> Vec<RawRow> {
    match json!({"Date": "2024-03-02", "Description": "Coffee", "Amount": "-4,20"}) {
        Value::Object(m) => vec![m],
        _ => unreachable!(),
    }
}

fn openai_at(base: &str, scenario: &str) -> OpenAiCategorizer {
    OpenAiCategorizer::new("sk-test".to_string(), None).with_endpoint(format!("{base}/openai/{scenario}"))
}

fn gemini_at(base: &str, scenario: &str) -> GeminiCategorizer {
    GeminiCategorizer::new("g-test".to_string(), None).with_base_url(format!("{base}/gemini/{scenario}"))
}

async fn run(c: &dyn Categorizer) -> Result<Vec<statement_analyzer::Transaction>, CategorizerError> {
    c.categorize(&rows(), &Taxonomy::default()).await
}

#[tokio::test]
async fn openai_reply_content_becomes_transactions() {
    let base = stub_server().await;
    let txs = run(&openai_at(&base, "ok")).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].description, "Coffee");
    assert_eq!(txs[0].amount, Decimal::new(-42, 1));
    assert_eq!(txs[0].tx_type, TxType::Expense);
    assert_eq!(txs[0].tags, vec!["cafe"]);
}

#[tokio::test]
async fn openai_status_codes_map_to_error_kinds() {
    let base = stub_server().await;

    let err = run(&openai_at(&base, "limited")).await.unwrap_err();
    assert!(matches!(err, CategorizerError::RateLimited), "{err:?}");

    let err = run(&openai_at(&base, "broken")).await.unwrap_err();
    match err {
        CategorizerError::Api(msg) => {
            assert!(msg.contains("500"), "{msg}");
            assert!(msg.contains("upstream exploded"), "{msg}");
        }
        other => panic!("expected Api, got {other:?}"),
    }

    let wrong_key = OpenAiCategorizer::new("sk-other".to_string(), None)
        .with_endpoint(format!("{base}/openai/ok"));
    let err = run(&wrong_key).await.unwrap_err();
    assert!(matches!(err, CategorizerError::Api(ref m) if m.contains("401")), "{err:?}");
}

#[tokio::test]
async fn openai_empty_or_unparseable_reply_is_malformed() {
    let base = stub_server().await;
    for scenario in ["empty", "garbage"] {
        let err = run(&openai_at(&base, scenario)).await.unwrap_err();
        assert!(matches!(err, CategorizerError::Malformed(_)), "{scenario}: {err:?}");
    }
}

#[tokio::test]
async fn missing_api_keys_fail_before_any_request() {
    // nothing listens on port 9; a request would surface as Network
    let openai = OpenAiCategorizer::new(String::new(), None).with_endpoint("http://127.0.0.1:9/");
    let err = run(&openai).await.unwrap_err();
    assert!(matches!(err, CategorizerError::NotConfigured(_)), "{err:?}");

    let gemini = GeminiCategorizer::new(String::new(), None).with_base_url("http://127.0.0.1:9");
    let err = run(&gemini).await.unwrap_err();
    assert!(matches!(err, CategorizerError::NotConfigured(_)), "{err:?}");
}

#[tokio::test]
async fn gemini_fenced_candidate_text_becomes_transactions() {
    let base = stub_server().await;
    let txs = run(&gemini_at(&base, "ok")).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].category, "Dining");
    assert_eq!(txs[0].group, "Expenses");
}

#[tokio::test]
async fn gemini_failures_map_to_error_kinds() {
    let base = stub_server().await;

    let err = run(&gemini_at(&base, "limited")).await.unwrap_err();
    assert!(matches!(err, CategorizerError::RateLimited), "{err:?}");

    let err = run(&gemini_at(&base, "broken")).await.unwrap_err();
    assert!(matches!(err, CategorizerError::Api(ref m) if m.contains("503")), "{err:?}");

    let err = run(&gemini_at(&base, "empty")).await.unwrap_err();
    assert!(matches!(err, CategorizerError::Malformed(ref m) if m.contains("no candidates")), "{err:?}");

    let err = run(&gemini_at(&base, "blocked")).await.unwrap_err();
    assert!(matches!(err, CategorizerError::Api(ref m) if m.contains("safety")), "{err:?}");
}

#[tokio::test]
async fn pipeline_upload_through_stubbed_provider() {
    let base = stub_server().await;
    let cfg = PipelineConfig {
        ledger_path: None,
        ..PipelineConfig::default()
    };

    let pipeline = Pipeline::from_config(cfg.clone(), Arc::new(gemini_at(&base, "ok"))).unwrap();
    let outcome = pipeline.process_upload(rows()).await.unwrap();
    assert!(!outcome.is_partial());
    assert_eq!(pipeline.ledger().snapshot().summary.total_expenses, Decimal::new(42, 1));

    let limited = Pipeline::from_config(cfg, Arc::new(openai_at(&base, "limited"))).unwrap();
    assert!(limited.process_upload(rows()).await.is_err());
    assert!(limited.ledger().snapshot().is_empty());
}
