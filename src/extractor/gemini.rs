//! Gemini `generateContent` extractor.
//!
//! The PDF is sent inline (base64) next to a schema prompt, with JSON output
//! requested. The reply text is handed to [`parse_order_reply`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use tracing::{debug, info};

use po_intake_core::models::OrderDocument;

use super::{parse_order_reply, DocumentExtractor, ExtractionError};
use crate::config::ExtractorConfig;

const ORDER_SCHEMA_PROMPT: &str = r#"Extract the purchase order in the attached PDF.
Reply with exactly one JSON object and nothing else, using this shape:
{
  "purchase_order_id": string,
  "order_date": string (YYYY-MM-DD),
  "buyer": { "name": string, "address": string },
  "supplier": { "name": string, "address": string },
  "currency": string,
  "tax_amount": number,
  "total_amount": number,
  "line_items": [
    {
      "model_id": string,
      "item_code": string,
      "description": string,
      "color": string,
      "sizes": { "<size label>": number },
      "unit_price": number,
      "delivery_date": string (YYYY-MM-DD) or null
    }
  ]
}
Rules:
- Numbers are JSON numbers, never strings.
- Dates use YYYY-MM-DD.
- Every size column of the table appears in "sizes"; an empty cell is 0.
  Keep quantities under the size header they are printed beneath.
- Colors are lowercase with single spaces ("Sand Stone" -> "sand stone").
- The supplier address comes from the "ship to" block or its equivalent."#;

pub struct GeminiExtractor {
    http: reqwest::Client,
    api_base: String,
    model: String,
    api_key: String,
}

impl GeminiExtractor {
    /// Reads the API key from the environment variable named in `config`.
    pub fn new(config: &ExtractorConfig) -> Result<Self, ExtractionError> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| ExtractionError::MissingCredential(config.api_key_env.clone()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn request_body(pdf: &[u8]) -> Value {
        serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": ORDER_SCHEMA_PROMPT },
                    { "inline_data": { "mime_type": "application/pdf", "data": STANDARD.encode(pdf) } }
                ]
            }],
            "generationConfig": { "responseMimeType": "application/json" }
        })
    }
}

/// Concatenated text parts of the first candidate.
fn reply_text(response: &Value) -> Result<String, ExtractionError> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| ExtractionError::Unparseable("response has no candidates".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.trim().is_empty() {
        return Err(ExtractionError::Unparseable("empty reply".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl DocumentExtractor for GeminiExtractor {
    async fn extract(&self, path: &Path) -> Result<OrderDocument, ExtractionError> {
        let pdf = tokio::fs::read(path).await.map_err(|source| ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);
        debug!(path = %path.display(), model = %self.model, "sending document for extraction");

        let resp = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(&pdf))
            .send()
            .await
            .map_err(|e| ExtractionError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ExtractionError::Unparseable(e.to_string()))?;
        let order = parse_order_reply(&reply_text(&json)?)?;
        info!(
            path = %path.display(),
            purchase_order_id = %order.purchase_order_id,
            line_items = order.line_items.len(),
            "extracted order"
        );
        Ok(order)
    }
}
