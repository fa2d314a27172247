//! SQLite-backed [`OrderRepository`].
//!
//! The upsert is one transaction: an `INSERT ... ON CONFLICT DO UPDATE ...
//! RETURNING id` on the `orders` table keyed by `purchase_order_id`, then a
//! delete of every line item owned by the returned id, then the fan-out
//! rows. Concurrent upserts of the same purchase order serialize on SQLite's
//! write lock; a failure anywhere rolls the whole call back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use po_intake_core::models::{
    OrderDocument, Party, PersistedLineItem, PersistedOrder, UpsertOutcome,
};
use po_intake_core::reconcile::{fan_out, validate_order};
use po_intake_core::store::{
    FilterOptions, OrderPage, OrderQuery, OrderRepository, OrderStats, OrderSummary, SortField,
    SortOrder,
};

/// SQLite implementation of [`OrderRepository`] over the `orders` and
/// `line_items` tables.
#[derive(Clone)]
pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn line_items(&self, order_id: &str) -> Result<Vec<PersistedLineItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, model_id, item_code, description, color, size,
                   quantity, unit_price, amount, delivery_date
            FROM line_items
            WHERE order_id = ?
            ORDER BY position
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(line_item_from_row).collect()
    }

    /// `column` is one of the fixed line-item column names, never user input.
    async fn distinct_line_item_values(&self, column: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM line_items WHERE {col} != '' ORDER BY {col}",
            col = column
        );
        sqlx::query_scalar(&sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to read distinct {} values", column))
    }
}

/// Shared `FROM`/`WHERE` of the order listing and its count. Binds `?1`
/// search, `?2` model id and `?3` color (lowercased `%...%` patterns) and
/// `?4` exact size; a NULL bind disables that filter.
const LISTING_FILTER: &str = r#"
    FROM orders o
    WHERE (?1 IS NULL
           OR lower(o.purchase_order_id) LIKE ?1
           OR lower(o.buyer_name) LIKE ?1
           OR lower(o.supplier_name) LIKE ?1)
      AND (?2 IS NULL OR EXISTS (SELECT 1 FROM line_items li
                                 WHERE li.order_id = o.id AND lower(li.model_id) LIKE ?2))
      AND (?3 IS NULL OR EXISTS (SELECT 1 FROM line_items li
                                 WHERE li.order_id = o.id AND lower(li.color) LIKE ?3))
      AND (?4 IS NULL OR EXISTS (SELECT 1 FROM line_items li
                                 WHERE li.order_id = o.id AND li.size = ?4))
"#;

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
}

fn timestamp(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

fn line_item_from_row(row: &SqliteRow) -> Result<PersistedLineItem> {
    let quantity: i64 = row.try_get("quantity")?;
    Ok(PersistedLineItem {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        model_id: row.try_get("model_id")?,
        item_code: row.try_get("item_code")?,
        description: row.try_get("description")?,
        color: row.try_get("color")?,
        size: row.try_get("size")?,
        quantity: u32::try_from(quantity).context("stored quantity out of range")?,
        unit_price: row.try_get("unit_price")?,
        amount: row.try_get("amount")?,
        delivery_date: parse_date(row.try_get("delivery_date")?),
    })
}

fn order_from_row(row: &SqliteRow, line_items: Vec<PersistedLineItem>) -> Result<PersistedOrder> {
    Ok(PersistedOrder {
        id: row.try_get("id")?,
        purchase_order_id: row.try_get("purchase_order_id")?,
        order_date: parse_date(row.try_get("order_date")?),
        buyer: Party {
            name: row.try_get("buyer_name")?,
            address: row.try_get("buyer_address")?,
        },
        supplier: Party {
            name: row.try_get("supplier_name")?,
            address: row.try_get("supplier_address")?,
        },
        currency: row.try_get("currency")?,
        tax_amount: row.try_get("tax_amount")?,
        total_amount: row.try_get("total_amount")?,
        created_at: timestamp(row.try_get("created_at")?),
        updated_at: timestamp(row.try_get("updated_at")?),
        line_items,
    })
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn upsert(&self, doc: &OrderDocument) -> Result<UpsertOutcome> {
        validate_order(doc)?;

        let candidate_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let order_id: String = sqlx::query_scalar(
            r#"
            INSERT INTO orders (id, purchase_order_id, order_date, buyer_name, buyer_address,
                                supplier_name, supplier_address, currency, tax_amount,
                                total_amount, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(purchase_order_id) DO UPDATE SET
                order_date = excluded.order_date,
                buyer_name = excluded.buyer_name,
                buyer_address = excluded.buyer_address,
                supplier_name = excluded.supplier_name,
                supplier_address = excluded.supplier_address,
                currency = excluded.currency,
                tax_amount = excluded.tax_amount,
                total_amount = excluded.total_amount,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&candidate_id)
        .bind(&doc.purchase_order_id)
        .bind(format_date(doc.order_date))
        .bind(&doc.buyer.name)
        .bind(&doc.buyer.address)
        .bind(&doc.supplier.name)
        .bind(&doc.supplier.address)
        .bind(&doc.currency)
        .bind(doc.tax_amount)
        .bind(doc.total_amount)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert order {}", doc.purchase_order_id))?;

        let is_duplicate = order_id != candidate_id;

        // Full replace: prior rows go before the new set is written
        sqlx::query("DELETE FROM line_items WHERE order_id = ?")
            .bind(&order_id)
            .execute(&mut *tx)
            .await?;

        for (position, item) in fan_out(&order_id, doc).iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO line_items (id, order_id, model_id, item_code, description, color,
                                        size, quantity, unit_price, amount, delivery_date, position)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.id)
            .bind(&item.order_id)
            .bind(&item.model_id)
            .bind(&item.item_code)
            .bind(&item.description)
            .bind(&item.color)
            .bind(&item.size)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price)
            .bind(item.amount)
            .bind(format_date(item.delivery_date))
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(UpsertOutcome {
            order_id,
            is_duplicate,
        })
    }

    async fn get_order(&self, key: &str) -> Result<Option<PersistedOrder>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = ? OR purchase_order_id = ? LIMIT 1")
            .bind(key)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let id: String = row.try_get("id")?;
        let items = self.line_items(&id).await?;
        Ok(Some(order_from_row(&row, items)?))
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let like = |needle: Option<String>| needle.map(|n| format!("%{}%", n));
        let search = like(query.search_needle());
        let model_id = like(query.model_id_needle());
        let color = like(query.color_needle());
        let size = query.size_filter();

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", LISTING_FILTER))
            .bind(&search)
            .bind(&model_id)
            .bind(&color)
            .bind(&size)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count orders")?;

        let sort_column = match query.sort_by {
            SortField::OrderDate => "o.order_date",
            SortField::TotalAmount => "o.total_amount",
            SortField::ItemCount => "line_item_count",
        };
        let direction = match query.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            r#"
            SELECT o.id, o.purchase_order_id, o.order_date, o.buyer_name, o.supplier_name,
                   o.currency, o.total_amount, o.created_at, o.updated_at,
                   (SELECT COUNT(*) FROM line_items li WHERE li.order_id = o.id) AS line_item_count
            {}
            ORDER BY {} {}, o.created_at DESC, o.rowid DESC
            LIMIT ?5 OFFSET ?6
            "#,
            LISTING_FILTER, sort_column, direction
        );

        let rows = sqlx::query(&sql)
            .bind(&search)
            .bind(&model_id)
            .bind(&color)
            .bind(&size)
            .bind(query.limit.max(0))
            .bind(query.offset.max(0))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list orders")?;

        let orders = rows
            .iter()
            .map(|row| {
                Ok(OrderSummary {
                    id: row.try_get("id")?,
                    purchase_order_id: row.try_get("purchase_order_id")?,
                    order_date: parse_date(row.try_get("order_date")?),
                    buyer_name: row.try_get("buyer_name")?,
                    supplier_name: row.try_get("supplier_name")?,
                    currency: row.try_get("currency")?,
                    total_amount: row.try_get("total_amount")?,
                    line_item_count: row.try_get("line_item_count")?,
                    created_at: timestamp(row.try_get("created_at")?),
                    updated_at: timestamp(row.try_get("updated_at")?),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(OrderPage { orders, total })
    }

    async fn delete_order(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = ? OR purchase_order_id = ?")
            .bind(key)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self) -> Result<OrderStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM orders) AS total_orders,
                (SELECT COUNT(*) FROM line_items) AS total_line_items,
                (SELECT COALESCE(SUM(total_amount), 0.0) FROM orders) AS total_value,
                (SELECT COUNT(DISTINCT buyer_name) FROM orders WHERE buyer_name != '') AS distinct_buyers
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OrderStats {
            total_orders: row.try_get("total_orders")?,
            total_line_items: row.try_get("total_line_items")?,
            total_value: row.try_get("total_value")?,
            distinct_buyers: row.try_get("distinct_buyers")?,
        })
    }

    async fn distinct_filters(&self) -> Result<FilterOptions> {
        Ok(FilterOptions {
            model_ids: self.distinct_line_item_values("model_id").await?,
            colors: self.distinct_line_item_values("color").await?,
            sizes: self.distinct_line_item_values("size").await?,
        })
    }
}
