//! Core data models shared by the ingestion pipeline.
//!
//! Mailbox messages arrive as a nested [`MimePart`] tree (the Gmail
//! `format=full` payload shape), are decoded into [`DecodedContent`], and the
//! purchase orders parsed out of their PDFs travel as [`OrderDocument`]s until
//! they are fanned out into [`PersistedLineItem`] rows.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════
// Mailbox side
// ═══════════════════════════════════════════════════════════════════════

/// A single `name: value` header on a MIME part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Body of a MIME part: either inline base64url data or a reference to an
/// attachment that must be fetched separately from the mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MimeBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub data: Option<String>,
}

/// One node of a message's MIME tree.
///
/// Leaf nodes carry a [`MimeBody`]; multipart containers carry child
/// `parts`. Field names follow the Gmail API so payloads deserialize
/// directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MimePart {
    #[serde(default)]
    pub part_id: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: MimeBody,
    #[serde(default)]
    pub parts: Vec<MimePart>,
}

impl MimePart {
    /// Case-insensitive header lookup on this node only.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// A message as returned by a mailbox provider.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: String,
    pub labels: Vec<String>,
    pub received_at: DateTime<Utc>,
    pub payload: MimePart,
}

impl RawMessage {
    pub fn subject(&self) -> &str {
        self.payload.header("Subject").unwrap_or("")
    }

    pub fn sender(&self) -> &str {
        self.payload.header("From").unwrap_or("")
    }
}

/// Plain-text and HTML bodies concatenated in MIME traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedContent {
    pub plain_text: String,
    pub html: String,
}

impl DecodedContent {
    /// Appends `other` after `self`, keeping traversal order.
    pub fn merge(mut self, other: DecodedContent) -> DecodedContent {
        self.plain_text.push_str(&other.plain_text);
        self.html.push_str(&other.html);
        self
    }
}

/// Metadata for a named MIME part that may hold a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRef {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    /// Set when the bytes live on the mailbox server.
    pub attachment_id: Option<String>,
    /// Set when the bytes were delivered inline (base64url).
    pub inline_data: Option<String>,
}

/// Half-open time interval `[start, end)` used to select messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window `[now - length, now)`, starting no earlier than the
    /// earliest representable instant.
    pub fn trailing(now: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: now
                .checked_sub_signed(length)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M:%S"),
            self.end.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

/// Where a candidate document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Attachment,
    RemoteUrl,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Attachment => "attachment",
            SourceKind::RemoteUrl => "url",
        }
    }
}

/// A document that passed content sniffing and was written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateDocument {
    pub source_kind: SourceKind,
    /// The URL or attachment filename the bytes came from.
    pub source: String,
    pub origin_filename: Option<String>,
    pub path: std::path::PathBuf,
    pub declared_mime_type: String,
    pub size_bytes: u64,
}

// ═══════════════════════════════════════════════════════════════════════
// Order side
// ═══════════════════════════════════════════════════════════════════════

/// Name and address of a buyer or supplier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    #[serde(default, deserialize_with = "string_or_null")]
    pub name: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub address: String,
}

/// Structured purchase order as produced by the document extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDocument {
    #[serde(deserialize_with = "string_or_null")]
    pub purchase_order_id: String,
    #[serde(default, deserialize_with = "lenient_date")]
    pub order_date: Option<NaiveDate>,
    #[serde(default)]
    pub buyer: Party,
    #[serde(default)]
    pub supplier: Party,
    #[serde(default = "default_currency", deserialize_with = "currency_or_default")]
    pub currency: String,
    #[serde(default, deserialize_with = "number_or_null")]
    pub tax_amount: f64,
    #[serde(default, deserialize_with = "number_or_null")]
    pub total_amount: f64,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

/// One article line of a purchase order, with its per-size quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default, deserialize_with = "string_or_null")]
    pub model_id: String,
    #[serde(default, alias = "article", deserialize_with = "string_or_null")]
    pub item_code: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub description: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub color: String,
    #[serde(default)]
    pub sizes: SizeBreakdown,
    #[serde(default, alias = "price", deserialize_with = "number_or_null")]
    pub unit_price: f64,
    #[serde(default, deserialize_with = "lenient_date")]
    pub delivery_date: Option<NaiveDate>,
}

/// Ordered `size label -> quantity` mapping.
///
/// Labels are unique. A zero quantity means "none of this size ordered".
/// Deserializes from a JSON object and keeps the object's key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeBreakdown(Vec<(String, u32)>);

impl SizeBreakdown {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets the quantity for `size`, replacing any earlier entry.
    pub fn set(&mut self, size: impl Into<String>, quantity: u32) {
        let size = size.into();
        match self.0.iter_mut().find(|(label, _)| *label == size) {
            Some(entry) => entry.1 = quantity,
            None => self.0.push((size, quantity)),
        }
    }

    pub fn get(&self, size: &str) -> Option<u32> {
        self.0.iter().find(|(label, _)| label == size).map(|e| e.1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(label, qty)| (label.as_str(), *qty))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_quantity(&self) -> u64 {
        self.0.iter().map(|(_, qty)| u64::from(*qty)).sum()
    }
}

impl<S: Into<String>> FromIterator<(S, u32)> for SizeBreakdown {
    fn from_iter<I: IntoIterator<Item = (S, u32)>>(iter: I) -> Self {
        let mut sizes = SizeBreakdown::new();
        for (label, qty) in iter {
            sizes.set(label, qty);
        }
        sizes
    }
}

impl Serialize for SizeBreakdown {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, qty) in &self.0 {
            map.serialize_entry(label, qty)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SizeBreakdown {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SizesVisitor;

        impl<'de> Visitor<'de> for SizesVisitor {
            type Value = SizeBreakdown;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of size label to quantity")
            }

            fn visit_unit<E: de::Error>(self) -> Result<SizeBreakdown, E> {
                Ok(SizeBreakdown::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<SizeBreakdown, A::Error> {
                let mut sizes = SizeBreakdown::new();
                while let Some((label, raw)) = access.next_entry::<String, serde_json::Value>()? {
                    if sizes.get(&label).is_some() {
                        return Err(de::Error::custom(format!("duplicate size label: {}", label)));
                    }
                    let qty = quantity_from_value(&raw).map_err(de::Error::custom)?;
                    sizes.0.push((label, qty));
                }
                Ok(sizes)
            }
        }

        deserializer.deserialize_any(SizesVisitor)
    }
}

/// Accepts integers, integral floats, numeric strings, empty strings and null.
fn quantity_from_value(raw: &serde_json::Value) -> Result<u32, String> {
    let as_float = match raw {
        serde_json::Value::Null => return Ok(0),
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) if s.trim().is_empty() => return Ok(0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match as_float {
        Some(q) if q >= 0.0 && q.fract() == 0.0 && q <= f64::from(u32::MAX) => Ok(q as u32),
        _ => Err(format!("invalid size quantity: {}", raw)),
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn string_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    })
}

fn currency_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let currency = string_or_null(deserializer)?;
    Ok(if currency.is_empty() {
        default_currency()
    } else {
        currency
    })
}

fn number_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(0.0),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| de::Error::custom("number out of range")),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(0.0),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("invalid number: {}", s))),
        Some(other) => Err(de::Error::custom(format!("invalid number: {}", other))),
    }
}

/// `YYYY-MM-DD` or nothing; any other shape becomes `None`.
fn lenient_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    let value: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok(),
        _ => None,
    })
}

/// A stored line item: one row per `(order, size)` with a non-zero quantity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedLineItem {
    pub id: String,
    pub order_id: String,
    pub model_id: String,
    pub item_code: String,
    pub description: String,
    pub color: String,
    pub size: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub amount: f64,
    pub delivery_date: Option<NaiveDate>,
}

/// A stored order with its line items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedOrder {
    pub id: String,
    pub purchase_order_id: String,
    pub order_date: Option<NaiveDate>,
    pub buyer: Party,
    pub supplier: Party,
    pub currency: String,
    pub tax_amount: f64,
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub line_items: Vec<PersistedLineItem>,
}

/// Result of an order upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub order_id: String,
    pub is_duplicate: bool,
}
