//! File Fetcher: bounded, content-sniffed document downloads.
//!
//! Every call returns a [`FetchOutcome`]; nothing here propagates an error,
//! because one email may carry dozens of links and a bad one must not abort
//! the rest. Bytes are streamed into an anonymous temp file inside the
//! download directory while the running total is checked against the size
//! cap, so an oversized body is abandoned mid-transfer and its partial file
//! is removed. A payload only gets its final, timestamp-prefixed name once
//! content sniffing has accepted it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use tempfile::{NamedTempFile, TempPath};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use po_intake_core::mime::decode_body_data;
use po_intake_core::models::{AttachmentRef, CandidateDocument, SourceKind};
use po_intake_core::sniff::{
    default_filename, filename_from_disposition, filename_from_url, materialized_name, sniff,
    DocumentKind, Sniff, SIGNATURE_SCAN_BYTES,
};

use crate::config::FetchConfig;
use crate::mailbox::MailboxProvider;

/// Attempts at a collision-free final name before giving up.
const MAX_NAME_ATTEMPTS: u32 = 100;

/// Why a candidate was not materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The body grew past the configured cap.
    TooLarge { limit: u64 },
    Empty,
    /// An HTML page served where a file was expected.
    HtmlErrorPage,
    NotExpectedType { detected: Option<String> },
    HttpStatus(u16),
    Network(String),
    Mailbox(String),
    Io(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooLarge { limit } => write!(f, "exceeds size limit of {} bytes", limit),
            SkipReason::Empty => f.write_str("empty body"),
            SkipReason::HtmlErrorPage => f.write_str("HTML page instead of a file"),
            SkipReason::NotExpectedType { detected: Some(mime) } => {
                write!(f, "not the expected document type (looks like {})", mime)
            }
            SkipReason::NotExpectedType { detected: None } => {
                f.write_str("not the expected document type")
            }
            SkipReason::HttpStatus(code) => write!(f, "HTTP {}", code),
            SkipReason::Network(msg) => write!(f, "network error: {}", msg),
            SkipReason::Mailbox(msg) => write!(f, "mailbox error: {}", msg),
            SkipReason::Io(msg) => write!(f, "i/o error: {}", msg),
        }
    }
}

/// What happened to one URL or attachment.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Accepted(CandidateDocument),
    Skipped { source: String, reason: SkipReason },
}

impl FetchOutcome {
    fn skipped(source: &str, reason: SkipReason) -> Self {
        debug!(source, %reason, "fetch skipped");
        FetchOutcome::Skipped {
            source: source.to_string(),
            reason,
        }
    }

    pub fn accepted(&self) -> Option<&CandidateDocument> {
        match self {
            FetchOutcome::Accepted(doc) => Some(doc),
            FetchOutcome::Skipped { .. } => None,
        }
    }
}

/// Bytes received so far for one candidate.
///
/// Writes go through `tokio::fs` so large bodies never block a runtime
/// worker. `path` removes the file on drop until it is persisted.
struct PartialDownload {
    file: tokio::fs::File,
    path: TempPath,
    head: Vec<u8>,
    total: u64,
}

impl PartialDownload {
    fn new(dir: &Path) -> std::io::Result<Self> {
        let (file, path) = tempfile::Builder::new()
            .prefix(".partial-")
            .tempfile_in(dir)?
            .into_parts();
        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
            head: Vec::with_capacity(SIGNATURE_SCAN_BYTES),
            total: 0,
        })
    }

    async fn push(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        if self.head.len() < SIGNATURE_SCAN_BYTES {
            let take = (SIGNATURE_SCAN_BYTES - self.head.len()).min(chunk.len());
            self.head.extend_from_slice(&chunk[..take]);
        }
        self.file.write_all(chunk).await?;
        self.total += chunk.len() as u64;
        Ok(())
    }

    /// Waits for pending writes and hands the file back for persisting.
    async fn into_temp_file(mut self) -> std::io::Result<NamedTempFile> {
        self.file.flush().await?;
        let file = self.file.into_std().await;
        Ok(NamedTempFile::from_parts(file, self.path))
    }
}

/// Downloads candidate documents into one directory.
pub struct FileFetcher {
    http: reqwest::Client,
    download_dir: PathBuf,
    max_bytes: u64,
    kind: DocumentKind,
}

impl FileFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.download_dir).with_context(|| {
            format!(
                "Failed to create download directory {}",
                config.download_dir.display()
            )
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            download_dir: config.download_dir.clone(),
            max_bytes: config.max_bytes,
            kind: config.document_kind,
        })
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// Streams `url` to disk and keeps it only if it sniffs as the
    /// configured document kind.
    pub async fn fetch_url(&self, url: &str) -> FetchOutcome {
        let mut resp = match self.http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => return FetchOutcome::skipped(url, SkipReason::Network(e.to_string())),
        };

        let status = resp.status();
        if !status.is_success() {
            return FetchOutcome::skipped(url, SkipReason::HttpStatus(status.as_u16()));
        }

        let declared = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let content_length = resp.content_length();

        if declared.contains("text/html") && content_length == Some(0) {
            return FetchOutcome::skipped(url, SkipReason::HtmlErrorPage);
        }
        if content_length.is_some_and(|len| len > self.max_bytes) {
            return FetchOutcome::skipped(url, SkipReason::TooLarge { limit: self.max_bytes });
        }

        let filename = resp
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(resp.url().as_str()))
            .unwrap_or_else(|| default_filename(Utc::now()));

        let mut partial = match PartialDownload::new(&self.download_dir) {
            Ok(partial) => partial,
            Err(e) => return FetchOutcome::skipped(url, SkipReason::Io(e.to_string())),
        };

        loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    if partial.total + chunk.len() as u64 > self.max_bytes {
                        // Dropping `partial` deletes the temp file.
                        return FetchOutcome::skipped(
                            url,
                            SkipReason::TooLarge { limit: self.max_bytes },
                        );
                    }
                    if let Err(e) = partial.push(&chunk).await {
                        return FetchOutcome::skipped(url, SkipReason::Io(e.to_string()));
                    }
                }
                Ok(None) => break,
                Err(e) => return FetchOutcome::skipped(url, SkipReason::Network(e.to_string())),
            }
        }

        self.finish(partial, SourceKind::RemoteUrl, url, &filename, &declared)
            .await
    }

    /// Resolves an attachment's bytes (inline or from the mailbox) and
    /// materializes them under the same rules as a download.
    pub async fn fetch_attachment(
        &self,
        mailbox: &dyn MailboxProvider,
        message_id: &str,
        attachment: &AttachmentRef,
    ) -> FetchOutcome {
        let source = attachment.filename.as_str();
        if attachment.size > self.max_bytes {
            return FetchOutcome::skipped(source, SkipReason::TooLarge { limit: self.max_bytes });
        }

        let bytes = match (&attachment.inline_data, &attachment.attachment_id) {
            (Some(data), _) => match decode_body_data(data) {
                Some(bytes) => bytes,
                None => {
                    return FetchOutcome::skipped(
                        source,
                        SkipReason::Mailbox("inline attachment data is not base64url".to_string()),
                    )
                }
            },
            (None, Some(id)) => match mailbox.get_attachment(message_id, id).await {
                Ok(bytes) => bytes,
                Err(e) => return FetchOutcome::skipped(source, SkipReason::Mailbox(format!("{:#}", e))),
            },
            (None, None) => return FetchOutcome::skipped(source, SkipReason::Empty),
        };

        self.materialize(
            SourceKind::Attachment,
            source,
            &attachment.filename,
            &attachment.mime_type,
            &bytes,
        )
        .await
    }

    /// Applies the size, emptiness and sniffing rules to bytes already in
    /// memory and writes them to the download directory when accepted.
    pub async fn materialize(
        &self,
        source_kind: SourceKind,
        source: &str,
        filename: &str,
        declared_mime: &str,
        bytes: &[u8],
    ) -> FetchOutcome {
        if bytes.len() as u64 > self.max_bytes {
            return FetchOutcome::skipped(source, SkipReason::TooLarge { limit: self.max_bytes });
        }
        let mut partial = match PartialDownload::new(&self.download_dir) {
            Ok(partial) => partial,
            Err(e) => return FetchOutcome::skipped(source, SkipReason::Io(e.to_string())),
        };
        if let Err(e) = partial.push(bytes).await {
            return FetchOutcome::skipped(source, SkipReason::Io(e.to_string()));
        }
        self.finish(partial, source_kind, source, filename, declared_mime)
            .await
    }

    async fn finish(
        &self,
        partial: PartialDownload,
        source_kind: SourceKind,
        source: &str,
        filename: &str,
        declared_mime: &str,
    ) -> FetchOutcome {
        if partial.total == 0 {
            return FetchOutcome::skipped(source, SkipReason::Empty);
        }

        match sniff(self.kind, &partial.head, declared_mime, Some(filename)) {
            Sniff::Match => {}
            Sniff::Html => return FetchOutcome::skipped(source, SkipReason::HtmlErrorPage),
            Sniff::Mismatch { detected } => {
                return FetchOutcome::skipped(source, SkipReason::NotExpectedType { detected })
            }
        }

        let name = materialized_name(Utc::now(), source_kind, filename, self.kind);
        let size_bytes = partial.total;
        let persisted = match partial.into_temp_file().await {
            Ok(file) => persist_unique(file, &self.download_dir, &name),
            Err(e) => Err(e),
        };
        let path = match persisted {
            Ok(path) => path,
            Err(e) => return FetchOutcome::skipped(source, SkipReason::Io(e.to_string())),
        };

        info!(source, path = %path.display(), size_bytes, "document accepted");
        FetchOutcome::Accepted(CandidateDocument {
            source_kind,
            source: source.to_string(),
            origin_filename: Some(filename.to_string()).filter(|f| !f.is_empty()),
            path,
            declared_mime_type: declared_mime.to_string(),
            size_bytes,
        })
    }
}

/// Moves `file` to `dir/name`, suffixing `_1`, `_2`, ... before the
/// extension if the name is taken.
fn persist_unique(mut file: NamedTempFile, dir: &Path, name: &str) -> std::io::Result<PathBuf> {
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem, format!(".{}", ext)),
        None => (name, String::new()),
    };

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = if attempt == 0 {
            dir.join(name)
        } else {
            dir.join(format!("{}_{}{}", stem, attempt, ext))
        };
        match file.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => file = e.file,
            Err(e) => return Err(e.error),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free file name for {}", name),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(dir: &Path, max_bytes: u64) -> FileFetcher {
        FileFetcher::new(&FetchConfig {
            download_dir: dir.to_path_buf(),
            max_bytes,
            ..FetchConfig::default()
        })
        .unwrap()
    }

    fn files_in(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_materialize_accepts_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path(), 1024);
        let outcome = f.materialize(SourceKind::Attachment, "po.pdf", "po.pdf", "application/octet-stream", b"%PDF-1.4 body").await;
        let doc = outcome.accepted().expect("accepted");
        assert!(doc.path.exists());
        assert!(doc
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_attachment_po.pdf"));
        assert_eq!(doc.size_bytes, 13);
    }

    #[tokio::test]
    async fn test_materialize_rejects_and_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path(), 8);

        let too_big = f.materialize(SourceKind::Attachment, "a", "a.pdf", "application/pdf", b"%PDF-1.4 way too long").await;
        assert!(matches!(too_big, FetchOutcome::Skipped { reason: SkipReason::TooLarge { limit: 8 }, .. }));

        let fake = f.materialize(SourceKind::Attachment, "b", "b.pdf", "application/pdf", b"hello").await;
        assert!(matches!(fake, FetchOutcome::Skipped { reason: SkipReason::NotExpectedType { .. }, .. }));

        let empty = f.materialize(SourceKind::Attachment, "c", "c.pdf", "application/pdf", b"").await;
        assert!(matches!(empty, FetchOutcome::Skipped { reason: SkipReason::Empty, .. }));

        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_materialize_writes_every_byte_before_persisting() {
        let dir = tempfile::tempdir().unwrap();
        let f = fetcher(dir.path(), 8 * 1024 * 1024);
        let mut body = b"%PDF-1.4\n".to_vec();
        body.extend((0..3 * 1024 * 1024).map(|i| (i % 251) as u8));

        let outcome = f
            .materialize(SourceKind::Attachment, "big", "big.pdf", "application/pdf", &body)
            .await;
        let doc = outcome.accepted().expect("accepted");
        assert_eq!(doc.size_bytes, body.len() as u64);
        assert_eq!(std::fs::read(&doc.path).unwrap(), body);
        assert_eq!(files_in(dir.path()).len(), 1);
    }

    #[test]
    fn test_name_collisions_get_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = NamedTempFile::new_in(dir.path()).unwrap();
        let second = NamedTempFile::new_in(dir.path()).unwrap();
        let a = persist_unique(first, dir.path(), "x_url_po.pdf").unwrap();
        let b = persist_unique(second, dir.path(), "x_url_po.pdf").unwrap();
        assert_eq!(a.file_name().unwrap(), "x_url_po.pdf");
        assert_eq!(b.file_name().unwrap(), "x_url_po_1.pdf");
    }

    #[test]
    fn test_skip_reason_messages() {
        assert_eq!(SkipReason::TooLarge { limit: 10 }.to_string(), "exceeds size limit of 10 bytes");
        assert_eq!(SkipReason::HttpStatus(404).to_string(), "HTTP 404");
    }
}
