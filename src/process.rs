//! Extract-then-upsert for one local document.
//!
//! Shared by the poll scheduler, the `process` / `ingest --process` CLI
//! commands, and the upload endpoint.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Serialize;
use tracing::info;

use po_intake_core::store::OrderRepository;

use crate::config::Config;
use crate::db;
use crate::extractor::{build_extractor, DocumentExtractor, ExtractionError};
use crate::repository::SqliteOrderRepository;

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub path: PathBuf,
    pub purchase_order_id: String,
    pub order_id: String,
    pub is_duplicate: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error("failed to store order {purchase_order_id}: {message}")]
    Persistence {
        purchase_order_id: String,
        message: String,
    },
}

pub async fn process_document(
    extractor: &dyn DocumentExtractor,
    repository: &dyn OrderRepository,
    path: &Path,
) -> std::result::Result<ProcessOutcome, ProcessError> {
    let order = extractor.extract(path).await?;
    let outcome = repository
        .upsert(&order)
        .await
        .map_err(|e| ProcessError::Persistence {
            purchase_order_id: order.purchase_order_id.clone(),
            message: format!("{:#}", e),
        })?;

    info!(
        path = %path.display(),
        purchase_order_id = %order.purchase_order_id,
        order_id = %outcome.order_id,
        duplicate = outcome.is_duplicate,
        "order stored"
    );
    Ok(ProcessOutcome {
        path: path.to_path_buf(),
        purchase_order_id: order.purchase_order_id,
        order_id: outcome.order_id,
        is_duplicate: outcome.is_duplicate,
    })
}

/// `process` command: extract + upsert a PDF already on disk.
pub async fn run_process(config: &Config, path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("No such file: {}", path.display());
    }
    let extractor = build_extractor(config)?;
    let repo = SqliteOrderRepository::new(db::connect(config).await?);
    let result = process_document(extractor.as_ref(), &repo, path).await;
    repo.pool().close().await;
    let outcome = result?;

    println!("path: {}", outcome.path.display());
    println!("purchase_order_id: {}", outcome.purchase_order_id);
    println!("order_id: {}", outcome.order_id);
    println!("duplicate: {}", outcome.is_duplicate);
    println!("ok");
    Ok(())
}
