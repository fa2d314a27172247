//! Directory-of-`.eml` mailbox for offline runs and tests.
//!
//! Every `*.eml` file directly under the root is one message; its id is the
//! file stem. Messages are windowed by their `Date` header, falling back to
//! the file's modification time. The label argument is not meaningful for a
//! flat directory and is ignored.
//!
//! Parsed messages are converted into the same [`MimePart`] tree the Gmail
//! provider produces: text bodies are carried inline (base64url), binary
//! parts are referenced by their part index and served by
//! [`get_attachment`](MailboxProvider::get_attachment).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};
use tracing::{debug, warn};

use po_intake_core::mime::encode_body_data;
use po_intake_core::models::{Header, MimeBody, MimePart, RawMessage, TimeWindow};

use super::MailboxProvider;

const MAX_DEPTH: usize = 16;

pub struct MaildirMailbox {
    root: PathBuf,
}

impl MaildirMailbox {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn message_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            bail!("invalid message id: '{}'", id);
        }
        Ok(self.root.join(format!("{}.eml", id)))
    }

    async fn read(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.message_path(id)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn parse(bytes: &[u8]) -> Result<Message<'_>> {
    MessageParser::default()
        .parse(bytes)
        .context("not a parseable RFC 822 message")
}

fn message_date(message: &Message<'_>) -> Option<DateTime<Utc>> {
    let rfc3339 = message.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

async fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn sender(message: &Message<'_>) -> String {
    let Some(addr) = message.from().and_then(|a| a.first()) else {
        return String::new();
    };
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{} <{}>", name, address),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => String::new(),
    }
}

/// Converts the parsed message into a [`MimePart`] tree rooted at part 0.
pub fn mime_tree(message: &Message<'_>) -> MimePart {
    let mut root = convert_part(message, 0, 0);
    let mut headers = Vec::new();
    if let Some(subject) = message.subject() {
        headers.push(Header {
            name: "Subject".to_string(),
            value: subject.to_string(),
        });
    }
    headers.push(Header {
        name: "From".to_string(),
        value: sender(message),
    });
    root.headers = headers;
    root
}

fn convert_part(message: &Message<'_>, index: usize, depth: usize) -> MimePart {
    let Some(part) = message.parts.get(index) else {
        return MimePart::default();
    };

    let declared = part.content_type().map(|ct| match ct.subtype() {
        Some(sub) => format!("{}/{}", ct.ctype(), sub),
        None => ct.ctype().to_string(),
    });
    let filename = part.attachment_name().unwrap_or("").to_string();
    let mut node = MimePart {
        part_id: index.to_string(),
        filename,
        ..Default::default()
    };

    let fallback = match &part.body {
        PartType::Text(text) => {
            node.body = inline_body(text.as_bytes());
            "text/plain"
        }
        PartType::Html(html) => {
            node.body = inline_body(html.as_bytes());
            "text/html"
        }
        PartType::Binary(bytes) | PartType::InlineBinary(bytes) => {
            node.body = referenced_body(index, bytes.len());
            "application/octet-stream"
        }
        PartType::Message(_) => {
            node.body = referenced_body(index, part.contents().len());
            "message/rfc822"
        }
        PartType::Multipart(children) => {
            if depth < MAX_DEPTH {
                node.parts = children
                    .iter()
                    .map(|child| convert_part(message, *child, depth + 1))
                    .collect();
            }
            "multipart/mixed"
        }
    };
    node.mime_type = declared.unwrap_or_else(|| fallback.to_string()).to_ascii_lowercase();
    node
}

fn inline_body(bytes: &[u8]) -> MimeBody {
    MimeBody {
        attachment_id: None,
        size: bytes.len() as u64,
        data: Some(encode_body_data(bytes)),
    }
}

fn referenced_body(index: usize, size: usize) -> MimeBody {
    MimeBody {
        attachment_id: Some(index.to_string()),
        size: size as u64,
        data: None,
    }
}

#[async_trait]
impl MailboxProvider for MaildirMailbox {
    fn name(&self) -> &str {
        "maildir"
    }

    async fn open(&self) -> Result<()> {
        let meta = tokio::fs::metadata(&self.root)
            .await
            .with_context(|| format!("Mail directory not found: {}", self.root.display()))?;
        if !meta.is_dir() {
            bail!("Mail root is not a directory: {}", self.root.display());
        }
        Ok(())
    }

    async fn list_messages(&self, window: &TimeWindow, _label: &str) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .with_context(|| format!("Failed to list {}", self.root.display()))?;
        let mut found: Vec<(DateTime<Utc>, String)> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("eml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await?;
            let date = match MessageParser::default().parse(&bytes) {
                Some(message) => message_date(&message),
                None => {
                    warn!(path = %path.display(), "skipping unparseable message");
                    continue;
                }
            };
            let Some(received) = date.or(file_mtime(&path).await) else {
                continue;
            };
            if window.contains(received) {
                found.push((received, id));
            }
        }

        found.sort();
        debug!(count = found.len(), %window, root = %self.root.display(), "listed maildir messages");
        Ok(found.into_iter().map(|(_, id)| id).collect())
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage> {
        let bytes = self.read(id).await?;
        let message = parse(&bytes).with_context(|| format!("message {}", id))?;
        let received_at = match message_date(&message) {
            Some(date) => date,
            None => file_mtime(&self.message_path(id)?)
                .await
                .unwrap_or_else(Utc::now),
        };

        Ok(RawMessage {
            id: id.to_string(),
            thread_id: id.to_string(),
            labels: Vec::new(),
            received_at,
            payload: mime_tree(&message),
        })
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let bytes = self.read(message_id).await?;
        let message = parse(&bytes)?;
        let index: usize = attachment_id
            .parse()
            .with_context(|| format!("invalid attachment id: '{}'", attachment_id))?;
        let part = message
            .parts
            .get(index)
            .with_context(|| format!("message {} has no part {}", message_id, index))?;
        Ok(part.contents().to_vec())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
