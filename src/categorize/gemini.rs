// src/categorize/gemini.rs
//! Gemini categorizer (generateContent with a JSON response mime type).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{build_prompt, parse_transactions_payload, Categorizer, CategorizerError, Taxonomy};
use crate::model::{RawRow, Transaction};

/// Gemini API base URL.
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-1.5-flash";

pub struct GeminiCategorizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiCategorizer {
    pub fn new(api_key: String, model_override: Option<&str>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key,
            model: model_override.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn api_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[async_trait]
impl Categorizer for GeminiCategorizer {
    async fn categorize(
        &self,
        rows: &[RawRow],
        taxonomy: &Taxonomy,
    ) -> Result<Vec<Transaction>, CategorizerError> {
        if self.api_key.is_empty() {
            return Err(CategorizerError::NotConfigured(
                "missing Gemini API key".to_string(),
            ));
        }

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(build_prompt(rows, taxonomy)),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                response_mime_type: "application/json",
            },
        };

        tracing::debug!(
            target: "categorize",
            model = %self.model,
            rows = rows.len(),
            "sending chunk to Gemini"
        );

        let response = self
            .client
            .post(self.api_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| CategorizerError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            if status.as_u16() == 429 {
                return Err(CategorizerError::RateLimited);
            }
            let error_text = response.text().await.unwrap_or_default();
            return Err(CategorizerError::Api(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        let api_response: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| CategorizerError::Malformed(format!("failed to parse response: {e}")))?;

        let candidate = api_response
            .candidates
            .first()
            .ok_or_else(|| CategorizerError::Malformed("no candidates".to_string()))?;
        if candidate.finish_reason.as_deref() == Some("SAFETY") {
            return Err(CategorizerError::Api("response blocked by safety filter".to_string()));
        }
        let text = candidate
            .content
            .as_ref()
            .and_then(|c| c.parts.first())
            .and_then(|p| p.text.as_deref())
            .unwrap_or("");
        parse_transactions_payload(text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
