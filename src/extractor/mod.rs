//! Document extraction: PDF in, [`OrderDocument`] out.
//!
//! The [`DocumentExtractor`] trait is the boundary to whatever
//! document-understanding service turns a purchase-order PDF into the fixed
//! order schema. Failures are typed ([`ExtractionError`]) so callers can tell
//! a missing file from a service outage from a malformed reply.

pub mod gemini;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use po_intake_core::models::OrderDocument;
use po_intake_core::reconcile::{validate_order, OrderValidationError};

use crate::config::Config;

pub use gemini::GeminiExtractor;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("cannot read document {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not set")]
    MissingCredential(String),
    #[error("extraction request failed: {0}")]
    Transport(String),
    #[error("extraction service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("extraction response is not valid order JSON: {0}")]
    Unparseable(String),
    #[error("extracted order is invalid: {0}")]
    Invalid(#[from] OrderValidationError),
}

/// Turns a local document into structured order data.
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<OrderDocument, ExtractionError>;
}

/// Builds the extractor selected by `[extractor] provider`.
pub fn build_extractor(config: &Config) -> Result<Arc<dyn DocumentExtractor>> {
    match config.extractor.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiExtractor::new(&config.extractor)?)),
        other => bail!("Unknown extractor provider: '{}'", other),
    }
}

/// Parses a model reply into a validated [`OrderDocument`].
///
/// Markdown code fences and any prose around the outermost JSON object are
/// ignored.
pub fn parse_order_reply(reply: &str) -> Result<OrderDocument, ExtractionError> {
    let cleaned = reply.trim().replace("```json", "").replace("```", "");
    let json = match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => {
            return Err(ExtractionError::Unparseable(
                "no JSON object in reply".to_string(),
            ))
        }
    };

    let order: OrderDocument =
        serde_json::from_str(json).map_err(|e| ExtractionError::Unparseable(e.to_string()))?;
    validate_order(&order)?;
    Ok(order)
}
