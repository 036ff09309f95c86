//! # Structured Generation Client
//!
//! The one remote call the evaluation path makes: prompt text plus an
//! optional JSON-schema constraint in, raw text expected to parse as JSON
//! out. The engine never trusts the response shape — all reconciliation
//! happens on the caller's side — so this layer only has to deliver bytes
//! and map failures onto `AppError::Generation`.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Capability to run one structured-output generation request.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Generate text for `prompt`, constrained by `schema` when given.
    async fn generate(&self, prompt: &str, schema: Option<&Value>) -> AppResult<String>;
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HttpGenerator {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(base_url: &str, model: &str, api_key: &str) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Generation(format!("client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl StructuredGenerator for HttpGenerator {
    async fn generate(&self, prompt: &str, schema: Option<&Value>) -> AppResult<String> {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.2,
            "stream": false
        });

        if let Some(schema) = schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "call_evaluation",
                    "strict": true,
                    "schema": schema
                }
            });
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Generation(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AppError::Generation(format!(
                "generation endpoint returned {}: {}",
                status, detail
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| AppError::Generation(format!("unreadable response body: {}", e)))?;

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                AppError::Generation("response carried no message content".to_string())
            })?;

        debug!("generation returned {} chars", content.len());
        Ok(content.to_string())
    }
}
