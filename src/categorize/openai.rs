// src/categorize/openai.rs
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{build_prompt, parse_transactions_payload, Categorizer, CategorizerError, Taxonomy};
use crate::model::{RawRow, Transaction};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI categorizer (Chat Completions API, JSON object response).
pub struct OpenAiCategorizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiCategorizer {
    /// `model_override`: pass Some("gpt-4o") to override; defaults to gpt-4o-mini.
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("statement-analyzer/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key,
            model: model_override.unwrap_or(DEFAULT_MODEL).to_string(),
            endpoint: OPENAI_CHAT_URL.to_string(),
        }
    }

    /// Point at a compatible server (proxies, local gateways).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}
#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}
#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}
#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}
#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

#[async_trait]
impl Categorizer for OpenAiCategorizer {
    async fn categorize(
        &self,
        rows: &[RawRow],
        taxonomy: &Taxonomy,
    ) -> Result<Vec<Transaction>, CategorizerError> {
        if self.api_key.is_empty() {
            return Err(CategorizerError::NotConfigured(
                "missing OpenAI API key".to_string(),
            ));
        }

        let prompt = build_prompt(rows, taxonomy);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: "You are a bank transaction categorization expert. Output JSON only.",
                },
                Msg {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        tracing::debug!(
            target: "categorize",
            model = %self.model,
            rows = rows.len(),
            "sending chunk to OpenAI"
        );

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| CategorizerError::Network(e.to_string()))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(CategorizerError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CategorizerError::Api(format!("OpenAI {status}: {body}")));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| CategorizerError::Malformed(e.to_string()))?;
        let content = body
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .unwrap_or("");
        parse_transactions_payload(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
