//! Order storage abstraction.
//!
//! The [`OrderRepository`] trait is the reconciliation contract every backend
//! implements: an upsert keyed on the purchase-order id that updates the
//! order row in place and fully replaces its line items, atomically.
//!
//! Implementations must be `Send + Sync`; the poll scheduler and manual
//! upload paths share one repository and may race on the same key. That race
//! is resolved inside the backend (an atomic upsert statement or a single
//! critical section), never by callers.

pub mod memory;

use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{OrderDocument, PersistedOrder, UpsertOutcome};

/// One row of an order listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub id: String,
    pub purchase_order_id: String,
    pub order_date: Option<NaiveDate>,
    pub buyer_name: String,
    pub supplier_name: String,
    pub currency: String,
    pub total_amount: f64,
    pub line_item_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column an order listing is sorted by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    OrderDate,
    TotalAmount,
    ItemCount,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order_date" => Ok(SortField::OrderDate),
            "total_amount" => Ok(SortField::TotalAmount),
            "item_count" => Ok(SortField::ItemCount),
            other => Err(format!(
                "unknown sort field '{}': expected order_date, total_amount or item_count",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{}': expected asc or desc", other)),
        }
    }
}

/// Filter, sort and paging for [`OrderRepository::list_orders`].
///
/// Line-item filters match an order when at least one of its line items
/// matches; each filter is checked on its own, and all given filters must
/// hold. Empty strings count as absent. Ties in the sort key fall back to
/// newest first.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderQuery {
    /// Case-insensitive substring over purchase-order id, buyer and supplier.
    #[serde(default)]
    pub search: Option<String>,
    /// Case-insensitive substring of a line item's model id.
    #[serde(default)]
    pub model_id: Option<String>,
    /// Case-insensitive substring of a line item's color.
    #[serde(default)]
    pub color: Option<String>,
    /// Exact size label of a line item.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self {
            search: None,
            model_id: None,
            color: None,
            size: None,
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            limit: default_limit(),
            offset: 0,
        }
    }
}

impl OrderQuery {
    /// Lowercased search needle, `None` when blank.
    pub fn search_needle(&self) -> Option<String> {
        non_blank(&self.search).map(|s| s.to_lowercase())
    }

    pub fn model_id_needle(&self) -> Option<String> {
        non_blank(&self.model_id).map(|s| s.to_lowercase())
    }

    pub fn color_needle(&self) -> Option<String> {
        non_blank(&self.color).map(|s| s.to_lowercase())
    }

    pub fn size_filter(&self) -> Option<String> {
        non_blank(&self.size).map(str::to_string)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// One page of an order listing plus the number of orders matching the
/// filters across all pages.
#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub orders: Vec<OrderSummary>,
    pub total: i64,
}

/// Distinct non-empty line-item values, sorted, for building filter menus.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub model_ids: Vec<String>,
    pub colors: Vec<String>,
    pub sizes: Vec<String>,
}

/// Aggregate figures over every stored order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderStats {
    pub total_orders: i64,
    pub total_line_items: i64,
    pub total_value: f64,
    pub distinct_buyers: i64,
}

/// Abstract order store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](OrderRepository::upsert) | Insert or update an order, replacing its line items |
/// | [`get_order`](OrderRepository::get_order) | Fetch one order by internal id or purchase-order id |
/// | [`list_orders`](OrderRepository::list_orders) | Filtered, sorted, paged listing with a total count |
/// | [`delete_order`](OrderRepository::delete_order) | Remove an order and its line items |
/// | [`stats`](OrderRepository::stats) | Aggregate counts and totals |
/// | [`distinct_filters`](OrderRepository::distinct_filters) | Values available to the line-item filters |
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert keyed on `purchase_order_id`, or update the existing order in
    /// place (same id) and replace all of its line items.
    ///
    /// Either every write of the call is applied or none is.
    async fn upsert(&self, doc: &OrderDocument) -> Result<UpsertOutcome>;

    /// `key` may be the internal id or the purchase-order id.
    async fn get_order(&self, key: &str) -> Result<Option<PersistedOrder>>;

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage>;

    /// Returns `false` when nothing matched `key`.
    async fn delete_order(&self, key: &str) -> Result<bool>;

    async fn stats(&self) -> Result<OrderStats>;

    async fn distinct_filters(&self) -> Result<FilterOptions>;
}
