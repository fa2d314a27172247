//! Ingestion pipeline orchestration.
//!
//! Coordinates one time window: mailbox listing → body decoding →
//! classification → link harvesting + attachment walk → bounded fetch.
//! Classification gates fetching: an email that is not order-related causes
//! no download and no attachment request. Failures are isolated per message
//! and per candidate; only a failed listing aborts the window.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use po_intake_core::classify::OrderClassifier;
use po_intake_core::links;
use po_intake_core::mime;
use po_intake_core::models::{CandidateDocument, RawMessage, TimeWindow};

use crate::config::Config;
use crate::extractor::build_extractor;
use crate::fetch::{FetchOutcome, FileFetcher};
use crate::mailbox::{build_mailbox, MailboxProvider};
use crate::process::process_document;
use crate::repository::SqliteOrderRepository;
use crate::db;

/// Produces local document paths for a time window.
///
/// The poll scheduler depends on this seam rather than on the mailbox
/// pipeline directly.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn collect(&self, window: TimeWindow) -> Result<Vec<PathBuf>>;
}

/// An accepted document and the email it came from.
#[derive(Debug, Clone, Serialize)]
pub struct IngestedDocument {
    pub message_id: String,
    pub subject: String,
    pub document: CandidateDocument,
}

/// A candidate that was looked at but not kept.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedCandidate {
    pub message_id: String,
    pub source: String,
    pub reason: String,
}

/// Everything that happened in one window, in processing order.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub window: TimeWindow,
    pub messages_listed: usize,
    pub messages_classified: usize,
    pub documents: Vec<IngestedDocument>,
    pub skipped: Vec<SkippedCandidate>,
    /// `(message id, error)` for messages that could not be read.
    pub failures: Vec<(String, String)>,
}

impl IngestReport {
    fn new(window: TimeWindow) -> Self {
        Self {
            window,
            messages_listed: 0,
            messages_classified: 0,
            documents: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.documents
            .iter()
            .map(|d| d.document.path.clone())
            .collect()
    }
}

pub struct IngestionOrchestrator {
    mailbox: Arc<dyn MailboxProvider>,
    classifier: OrderClassifier,
    fetcher: FileFetcher,
    label: String,
}

impl IngestionOrchestrator {
    pub fn new(
        mailbox: Arc<dyn MailboxProvider>,
        classifier: OrderClassifier,
        fetcher: FileFetcher,
        label: impl Into<String>,
    ) -> Self {
        Self {
            mailbox,
            classifier,
            fetcher,
            label: label.into(),
        }
    }

    pub fn mailbox(&self) -> &Arc<dyn MailboxProvider> {
        &self.mailbox
    }

    pub fn fetcher(&self) -> &FileFetcher {
        &self.fetcher
    }

    /// Runs the pipeline over `window`.
    pub async fn ingest(&self, window: TimeWindow) -> Result<IngestReport> {
        let ids = self
            .mailbox
            .list_messages(&window, &self.label)
            .await
            .with_context(|| format!("Failed to list {} messages in {}", self.mailbox.name(), window))?;

        let mut report = IngestReport::new(window);
        report.messages_listed = ids.len();

        for id in &ids {
            let message = match self.mailbox.get_message(id).await {
                Ok(message) => message,
                Err(e) => {
                    warn!(message_id = %id, error = %format!("{:#}", e), "failed to read message");
                    report.failures.push((id.clone(), format!("{:#}", e)));
                    continue;
                }
            };
            if !window.contains(message.received_at) {
                debug!(message_id = %id, received_at = %message.received_at, "outside window");
                continue;
            }
            self.process_message(&message, &mut report).await;
        }

        info!(
            window = %window,
            listed = report.messages_listed,
            orders = report.messages_classified,
            documents = report.documents.len(),
            skipped = report.skipped.len(),
            "ingest window complete"
        );
        Ok(report)
    }

    async fn process_message(&self, message: &RawMessage, report: &mut IngestReport) {
        let content = mime::extract(&message.payload);
        let verdict = self.classifier.classify(
            message.subject(),
            message.sender(),
            &content.plain_text,
            &content.html,
        );
        if !verdict.is_order {
            debug!(message_id = %message.id, subject = message.subject(), "not order-related");
            return;
        }
        report.messages_classified += 1;
        debug!(message_id = %message.id, tier = ?verdict.tier, "order-related email");

        let mut outcomes = Vec::new();
        for attachment in mime::attachments(&message.payload) {
            outcomes.push(
                self.fetcher
                    .fetch_attachment(self.mailbox.as_ref(), &message.id, &attachment)
                    .await,
            );
        }
        for url in links::harvest(&content.plain_text, &content.html) {
            outcomes.push(self.fetcher.fetch_url(&url).await);
        }

        for outcome in outcomes {
            match outcome {
                FetchOutcome::Accepted(document) => report.documents.push(IngestedDocument {
                    message_id: message.id.clone(),
                    subject: message.subject().to_string(),
                    document,
                }),
                FetchOutcome::Skipped { source, reason } => report.skipped.push(SkippedCandidate {
                    message_id: message.id.clone(),
                    source,
                    reason: reason.to_string(),
                }),
            }
        }
    }
}

#[async_trait]
impl DocumentSource for IngestionOrchestrator {
    async fn collect(&self, window: TimeWindow) -> Result<Vec<PathBuf>> {
        Ok(self.ingest(window).await?.paths())
    }
}

/// Parses a CLI window bound: RFC 3339, or `YYYY-MM-DD` meaning midnight UTC
/// (the following midnight when `end_of_day`).
pub fn parse_bound(value: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD or RFC 3339", value))?;
    let date = if end_of_day {
        date.succ_opt().context("date out of range")?
    } else {
        date
    };
    Ok(date.and_time(chrono::NaiveTime::MIN).and_utc())
}

/// `ingest` command: one window, optionally followed by extract + upsert.
pub async fn run_ingest(
    config: &Config,
    since: Option<String>,
    until: Option<String>,
    process: bool,
) -> Result<()> {
    let end = match until {
        Some(ref s) => parse_bound(s, true)?,
        None => Utc::now(),
    };
    let start = match since {
        Some(ref s) => parse_bound(s, false)?,
        None => {
            let length = i64::try_from(config.scheduler.interval_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .context("scheduler.interval_secs is out of range")?;
            TimeWindow::trailing(end, length).start
        }
    };
    if start >= end {
        bail!("--since must be before --until");
    }
    let window = TimeWindow::new(start, end);

    let mailbox = build_mailbox(config)?;
    mailbox.open().await?;
    let orchestrator = IngestionOrchestrator::new(
        mailbox.clone(),
        OrderClassifier::new(config.classifier.keyword_set()),
        FileFetcher::new(&config.fetch)?,
        config.mailbox.label.clone(),
    );
    let report = orchestrator.ingest(window).await;
    mailbox.close().await?;
    let report = report?;

    println!("window: {}", report.window);
    println!("messages: {}", report.messages_listed);
    println!("order_emails: {}", report.messages_classified);
    for doc in &report.documents {
        println!(
            "document: {} (message {}, {})",
            doc.document.path.display(),
            doc.message_id,
            doc.document.source
        );
    }
    for skip in &report.skipped {
        println!("skipped: {} ({})", skip.source, skip.reason);
    }
    for (id, err) in &report.failures {
        println!("failed: message {} ({})", id, err);
    }

    if process && !report.documents.is_empty() {
        let extractor = build_extractor(config)?;
        let repo = SqliteOrderRepository::new(db::connect(config).await?);
        let mut created = 0;
        let mut updated = 0;
        let mut errors = 0;
        for path in report.paths() {
            match process_document(extractor.as_ref(), &repo, &path).await {
                Ok(outcome) => {
                    if outcome.is_duplicate {
                        updated += 1;
                    } else {
                        created += 1;
                    }
                    println!(
                        "order: {} -> {}{}",
                        path.display(),
                        outcome.purchase_order_id,
                        if outcome.is_duplicate { " (updated)" } else { "" }
                    );
                }
                Err(e) => {
                    errors += 1;
                    println!("error: {} ({})", path.display(), e);
                }
            }
        }
        println!("orders_created: {}", created);
        println!("orders_updated: {}", updated);
        println!("errors: {}", errors);
        repo.pool().close().await;
    }

    println!("ok");
    Ok(())
}
