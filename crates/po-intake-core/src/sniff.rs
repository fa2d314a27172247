//! Content sniffing and download filename rules.
//!
//! A payload is accepted as the expected [`DocumentKind`] from what its bytes
//! look like. The declared content type and the filename extension are only
//! used to confirm a signature found slightly past the first byte (some
//! generators prepend whitespace or a BOM); on their own they never accept
//! anything.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SourceKind;

/// How far into the payload a late signature may start.
pub const SIGNATURE_SCAN_BYTES: usize = 1024;

/// The document type the pipeline collects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    #[default]
    Pdf,
}

impl DocumentKind {
    pub fn magic(&self) -> &'static [u8] {
        match self {
            DocumentKind::Pdf => b"%PDF-",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
        }
    }

    /// Substring expected in a matching declared content type.
    pub fn mime_marker(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            other => Err(format!("unknown document kind: '{}'", other)),
        }
    }
}

/// Outcome of inspecting a payload head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniff {
    Match,
    /// Markup where a document was expected, typically a login or error page.
    Html,
    /// Something else; `detected` carries the recognised MIME type, if any.
    Mismatch { detected: Option<String> },
}

/// Inspects the first bytes of a payload.
///
/// `head` should hold at least [`SIGNATURE_SCAN_BYTES`] bytes when the
/// payload is that long.
pub fn sniff(kind: DocumentKind, head: &[u8], declared_mime: &str, filename: Option<&str>) -> Sniff {
    let magic = kind.magic();
    if head.starts_with(magic) {
        return Sniff::Match;
    }
    if looks_like_html(head) {
        return Sniff::Html;
    }
    if let Some(detected) = infer::get(head) {
        if !detected.mime_type().contains(kind.mime_marker()) {
            return Sniff::Mismatch {
                detected: Some(detected.mime_type().to_string()),
            };
        }
    }

    let window = &head[..head.len().min(SIGNATURE_SCAN_BYTES)];
    let late_signature = window.windows(magic.len()).any(|w| w == magic);
    let declared = declared_mime.to_ascii_lowercase().contains(kind.mime_marker());
    let by_extension = filename.is_some_and(|name| has_extension(name, kind));

    if late_signature && (declared || by_extension) {
        Sniff::Match
    } else {
        Sniff::Mismatch { detected: None }
    }
}

fn looks_like_html(head: &[u8]) -> bool {
    let prefix = &head[..head.len().min(256)];
    let text = String::from_utf8_lossy(prefix);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start().to_ascii_lowercase();
    trimmed.starts_with("<!doctype html") || trimmed.starts_with("<html") || trimmed.starts_with("<head")
}

fn has_extension(name: &str, kind: DocumentKind) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(kind.extension()))
}

/// Filename from a `Content-Disposition` header value.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))
        .map(|(_, value)| value.trim().trim_matches(|c: char| c == '"' || c == '\'').to_string())
        .filter(|name| !name.is_empty())
}

/// Last URL path segment, if it carries an extension.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if last.contains('.') {
        Some(last.to_string())
    } else {
        None
    }
}

/// Synthesized name for downloads that carry no usable filename.
pub fn default_filename(now: DateTime<Utc>) -> String {
    format!("downloaded_file_{}", now.format("%Y%m%d_%H%M%S"))
}

/// Replaces anything outside `[\w.-]` with `_` and forces the kind's extension.
pub fn sanitize_filename(name: &str, kind: DocumentKind) -> String {
    let mut safe: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = safe.trim_start_matches('.');
    if trimmed.len() != safe.len() {
        safe = trimmed.to_string();
    }
    if safe.is_empty() {
        safe = "document".to_string();
    }
    if !has_extension(&safe, kind) {
        safe.push('.');
        safe.push_str(kind.extension());
    }
    safe
}

/// `<timestamp>_<source>_<sanitized name>`, the on-disk name of a document.
pub fn materialized_name(
    now: DateTime<Utc>,
    source: SourceKind,
    origin: &str,
    kind: DocumentKind,
) -> String {
    format!(
        "{}_{}_{}",
        now.format("%Y%m%d_%H%M%S"),
        source.as_str(),
        sanitize_filename(origin, kind)
    )
}
