use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use po_intake::config::FetchConfig;
use po_intake::extractor::{DocumentExtractor, ExtractionError};
use po_intake::fetch::FileFetcher;
use po_intake::ingest::DocumentSource;
use po_intake::scheduler::PollScheduler;
use po_intake::server::{build_router, AppState};
use po_intake_core::models::{OrderDocument, TimeWindow};
use po_intake_core::store::memory::InMemoryOrderRepository;

/// Returns a fixed order for every document.
struct CannedExtractor;

#[async_trait]
impl DocumentExtractor for CannedExtractor {
    async fn extract(&self, path: &Path) -> Result<OrderDocument, ExtractionError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ExtractionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.ends_with(b"%%BROKEN") {
            return Err(ExtractionError::Unparseable("no JSON object in reply".to_string()));
        }
        Ok(serde_json::from_value(json!({
            "purchase_order_id": "PO-42",
            "buyer": { "name": "Northwind" },
            "total_amount": 30.0,
            "line_items": [{ "item_code": "CAP", "sizes": { "OS": 3 }, "unit_price": 10.0 }]
        }))
        .unwrap())
    }
}

struct NoDocuments;

#[async_trait]
impl DocumentSource for NoDocuments {
    async fn collect(&self, _window: TimeWindow) -> anyhow::Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

async fn spawn_app(download_dir: &Path) -> String {
    let repository = Arc::new(InMemoryOrderRepository::new());
    let extractor = Arc::new(CannedExtractor);
    let scheduler = PollScheduler::new(
        Arc::new(NoDocuments),
        extractor.clone(),
        repository.clone(),
        Duration::from_secs(3600),
    );
    let fetcher = FileFetcher::new(&FetchConfig {
        download_dir: download_dir.to_path_buf(),
        ..FetchConfig::default()
    })
    .unwrap();

    let state = AppState {
        repository,
        extractor,
        fetcher: Arc::new(fetcher),
        scheduler,
    };
    let app = build_router(state, 1024 * 1024);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(dir.path()).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_upload_then_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(dir.path()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/upload-pdf?filename=order.pdf", base))
        .header("content-type", "application/pdf")
        .body(b"%PDF-1.4\nbody".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["purchase_order_id"], "PO-42");
    assert_eq!(outcome["is_duplicate"], false);

    let order: Value = client
        .get(format!("{}/orders/PO-42", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(order["line_items"].as_array().unwrap().len(), 1);
    assert_eq!(order["line_items"][0]["amount"], 30.0);

    let list: Value = client
        .get(format!("{}/orders?search=north", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["orders"].as_array().unwrap().len(), 1);
    assert_eq!(list["total"], 1);

    let filters: Value = client
        .get(format!("{}/filters", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(filters["sizes"], json!(["OS"]));

    let by_size: Value = client
        .get(format!("{}/orders?size=XL&sort_by=total_amount&sort_order=asc", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_size["total"], 0);

    let stats: Value = client
        .get(format!("{}/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_orders"], 1);

    let resp = client
        .delete(format!("{}/orders/PO-42", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(format!("{}/orders/PO-42", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_multipart_upload_uses_file_field() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(dir.path()).await;

    let part = reqwest::multipart::Part::bytes(b"%PDF-1.4\nform".to_vec())
        .file_name("PO-42.pdf")
        .mime_str("application/pdf")
        .unwrap();
    let form = reqwest::multipart::Form::new()
        .text("note", "ignored")
        .part("file", part);

    let resp = reqwest::Client::new()
        .post(format!("{}/upload-pdf", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["purchase_order_id"], "PO-42");

    let stored: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].ends_with("PO-42.pdf"), "{:?}", stored);
}

#[tokio::test]
async fn test_multipart_upload_without_file_field() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(dir.path()).await;

    let form = reqwest::multipart::Form::new().text("note", "no document here");
    let resp = reqwest::Client::new()
        .post(format!("{}/upload-pdf", base))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_upload_rejects_non_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(dir.path()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/upload-pdf", base))
        .header("content-type", "application/pdf")
        .body("definitely not a pdf")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_extraction_failure_is_500() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(dir.path()).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/upload-pdf", base))
        .body(b"%PDF-1.4\n%%BROKEN".to_vec())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "extraction_failed");
    assert!(err["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not valid order JSON"));
}

#[tokio::test]
async fn test_scheduler_control() {
    let dir = tempfile::tempdir().unwrap();
    let base = spawn_app(dir.path()).await;
    let client = reqwest::Client::new();

    let status: Value = client
        .get(format!("{}/scheduler/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], false);
    assert_eq!(status["interval_secs"], 3600);

    let started: Value = client
        .post(format!("{}/scheduler/start", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["result"], "started");
    assert_eq!(started["status"]["running"], true);

    let again: Value = client
        .post(format!("{}/scheduler/start", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["result"], "already_running");

    let stopped: Value = client
        .post(format!("{}/scheduler/stop", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["result"], "stopped");
    assert_eq!(stopped["status"]["running"], false);
}
