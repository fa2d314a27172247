//! In-memory [`OrderRepository`] for tests and offline runs.
//!
//! All state sits behind one `std::sync::RwLock`, and each upsert runs
//! entirely under a single write guard, so readers never see an order whose
//! line items are half replaced.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{OrderDocument, PersistedOrder, UpsertOutcome};
use crate::reconcile::{fan_out, validate_order};

use super::{
    FilterOptions, OrderPage, OrderQuery, OrderRepository, OrderStats, OrderSummary, SortField,
    SortOrder,
};

#[derive(Default)]
struct Tables {
    orders: HashMap<String, PersistedOrder>,
    /// purchase_order_id -> id
    by_business_key: HashMap<String, String>,
    /// id -> insertion sequence, the newest-first tie-breaker
    inserted: HashMap<String, u64>,
    next_seq: u64,
}

impl Tables {
    fn resolve(&self, key: &str) -> Option<&PersistedOrder> {
        self.orders.get(key).or_else(|| {
            self.by_business_key
                .get(key)
                .and_then(|id| self.orders.get(id))
        })
    }
}

/// In-memory order store.
#[derive(Default)]
pub struct InMemoryOrderRepository {
    tables: RwLock<Tables>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("order store lock poisoned")
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn upsert(&self, doc: &OrderDocument) -> Result<UpsertOutcome> {
        validate_order(doc)?;
        let now = Utc::now();
        let mut tables = self.tables.write().map_err(poisoned)?;

        let existing = tables.by_business_key.get(&doc.purchase_order_id).cloned();
        let is_duplicate = existing.is_some();
        let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());
        let created_at = tables
            .orders
            .get(&id)
            .map(|o| o.created_at)
            .unwrap_or(now);

        let order = PersistedOrder {
            id: id.clone(),
            purchase_order_id: doc.purchase_order_id.clone(),
            order_date: doc.order_date,
            buyer: doc.buyer.clone(),
            supplier: doc.supplier.clone(),
            currency: doc.currency.clone(),
            tax_amount: doc.tax_amount,
            total_amount: doc.total_amount,
            created_at,
            updated_at: now,
            line_items: fan_out(&id, doc),
        };
        tables
            .by_business_key
            .insert(doc.purchase_order_id.clone(), id.clone());
        if !is_duplicate {
            let seq = tables.next_seq;
            tables.next_seq += 1;
            tables.inserted.insert(id.clone(), seq);
        }
        tables.orders.insert(id.clone(), order);

        Ok(UpsertOutcome {
            order_id: id,
            is_duplicate,
        })
    }

    async fn get_order(&self, key: &str) -> Result<Option<PersistedOrder>> {
        let tables = self.tables.read().map_err(poisoned)?;
        Ok(tables.resolve(key).cloned())
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<OrderPage> {
        let tables = self.tables.read().map_err(poisoned)?;
        let needle = query.search_needle();
        let model_id = query.model_id_needle();
        let color = query.color_needle();
        let size = query.size_filter();

        let mut matched: Vec<&PersistedOrder> = tables
            .orders
            .values()
            .filter(|o| match &needle {
                Some(n) => [&o.purchase_order_id, &o.buyer.name, &o.supplier.name]
                    .iter()
                    .any(|field| field.to_lowercase().contains(n.as_str())),
                None => true,
            })
            .filter(|o| match &model_id {
                Some(m) => o
                    .line_items
                    .iter()
                    .any(|li| li.model_id.to_lowercase().contains(m.as_str())),
                None => true,
            })
            .filter(|o| match &color {
                Some(c) => o
                    .line_items
                    .iter()
                    .any(|li| li.color.to_lowercase().contains(c.as_str())),
                None => true,
            })
            .filter(|o| match &size {
                Some(sz) => o.line_items.iter().any(|li| &li.size == sz),
                None => true,
            })
            .collect();

        let seq = |o: &PersistedOrder| tables.inserted.get(&o.id).copied().unwrap_or(0);
        matched.sort_by(|a, b| {
            let key = match query.sort_by {
                // None sorts lowest, like NULL in SQL
                SortField::OrderDate => a.order_date.cmp(&b.order_date),
                SortField::TotalAmount => a
                    .total_amount
                    .partial_cmp(&b.total_amount)
                    .unwrap_or(Ordering::Equal),
                SortField::ItemCount => a.line_items.len().cmp(&b.line_items.len()),
            };
            let key = match query.sort_order {
                SortOrder::Asc => key,
                SortOrder::Desc => key.reverse(),
            };
            key.then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| seq(b).cmp(&seq(a)))
        });

        let total = matched.len() as i64;
        let orders = matched
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .map(|o| OrderSummary {
                id: o.id.clone(),
                purchase_order_id: o.purchase_order_id.clone(),
                order_date: o.order_date,
                buyer_name: o.buyer.name.clone(),
                supplier_name: o.supplier.name.clone(),
                currency: o.currency.clone(),
                total_amount: o.total_amount,
                line_item_count: o.line_items.len() as i64,
                created_at: o.created_at,
                updated_at: o.updated_at,
            })
            .collect();

        Ok(OrderPage { orders, total })
    }

    async fn delete_order(&self, key: &str) -> Result<bool> {
        let mut tables = self.tables.write().map_err(poisoned)?;
        let Some((id, business_key)) = tables
            .resolve(key)
            .map(|o| (o.id.clone(), o.purchase_order_id.clone()))
        else {
            return Ok(false);
        };
        tables.orders.remove(&id);
        tables.inserted.remove(&id);
        tables.by_business_key.remove(&business_key);
        Ok(true)
    }

    async fn stats(&self) -> Result<OrderStats> {
        let tables = self.tables.read().map_err(poisoned)?;
        let buyers: HashSet<&str> = tables
            .orders
            .values()
            .map(|o| o.buyer.name.as_str())
            .filter(|name| !name.is_empty())
            .collect();
        Ok(OrderStats {
            total_orders: tables.orders.len() as i64,
            total_line_items: tables.orders.values().map(|o| o.line_items.len() as i64).sum(),
            total_value: tables.orders.values().map(|o| o.total_amount).sum(),
            distinct_buyers: buyers.len() as i64,
        })
    }

    async fn distinct_filters(&self) -> Result<FilterOptions> {
        let tables = self.tables.read().map_err(poisoned)?;
        let mut model_ids = BTreeSet::new();
        let mut colors = BTreeSet::new();
        let mut sizes = BTreeSet::new();
        for item in tables.orders.values().flat_map(|o| &o.line_items) {
            for (set, value) in [
                (&mut model_ids, &item.model_id),
                (&mut colors, &item.color),
                (&mut sizes, &item.size),
            ] {
                if !value.is_empty() {
                    set.insert(value.clone());
                }
            }
        }
        Ok(FilterOptions {
            model_ids: model_ids.into_iter().collect(),
            colors: colors.into_iter().collect(),
            sizes: sizes.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineItem, Party};

    fn doc(po: &str, sizes: &[(&str, u32)]) -> OrderDocument {
        OrderDocument {
            purchase_order_id: po.to_string(),
            order_date: None,
            buyer: Party {
                name: "Acme Retail".to_string(),
                address: String::new(),
            },
            supplier: Party::default(),
            currency: "USD".to_string(),
            tax_amount: 0.0,
            total_amount: 100.0,
            line_items: vec![LineItem {
                model_id: "M-1".to_string(),
                item_code: "A-1".to_string(),
                description: String::new(),
                color: String::new(),
                sizes: sizes.iter().map(|(s, q)| (*s, *q)).collect(),
                unit_price: 4.0,
                delivery_date: None,
            }],
        }
    }

    fn sizes_of(order: &PersistedOrder) -> Vec<(String, u32)> {
        order
            .line_items
            .iter()
            .map(|li| (li.size.clone(), li.quantity))
            .collect()
    }

    #[tokio::test]
    async fn test_second_upsert_replaces_line_items() {
        let repo = InMemoryOrderRepository::new();
        let first = repo.upsert(&doc("PO-1", &[("S", 1), ("M", 2)])).await.unwrap();
        assert!(!first.is_duplicate);

        let second = repo.upsert(&doc("PO-1", &[("XL", 5)])).await.unwrap();
        assert!(second.is_duplicate);
        assert_eq!(second.order_id, first.order_id);

        let stored = repo.get_order("PO-1").await.unwrap().unwrap();
        assert_eq!(sizes_of(&stored), vec![("XL".to_string(), 5)]);
        assert_eq!(stored.line_items[0].amount, 20.0);
    }

    #[tokio::test]
    async fn test_identical_reupsert_is_duplicate_with_same_rows() {
        let repo = InMemoryOrderRepository::new();
        let d = doc("PO-2", &[("XS", 0), ("M", 12), ("L", 8)]);
        repo.upsert(&d).await.unwrap();
        let before = repo.get_order("PO-2").await.unwrap().unwrap();
        let again = repo.upsert(&d).await.unwrap();
        let after = repo.get_order(&again.order_id).await.unwrap().unwrap();

        assert!(again.is_duplicate);
        assert_eq!(sizes_of(&before), sizes_of(&after));
        assert_eq!(before.created_at, after.created_at);
        assert_eq!(after.line_items.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_business_key_rejected() {
        let repo = InMemoryOrderRepository::new();
        assert!(repo.upsert(&doc("", &[("M", 1)])).await.is_err());
        assert_eq!(repo.stats().await.unwrap().total_orders, 0);
    }

    #[tokio::test]
    async fn test_list_delete_and_stats() {
        let repo = InMemoryOrderRepository::new();
        repo.upsert(&doc("PO-A", &[("M", 1)])).await.unwrap();
        repo.upsert(&doc("PO-B", &[("M", 1), ("L", 1)])).await.unwrap();

        let hits = repo
            .list_orders(&OrderQuery {
                search: Some("po-b".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(hits.total, 1);
        assert_eq!(hits.orders[0].line_item_count, 2);

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total_orders, 2);
        assert_eq!(stats.total_line_items, 3);
        assert_eq!(stats.distinct_buyers, 1);

        assert!(repo.delete_order("PO-A").await.unwrap());
        assert!(!repo.delete_order("PO-A").await.unwrap());
        assert!(repo.get_order("PO-A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_item_filters_and_sort() {
        let repo = InMemoryOrderRepository::new();
        let mut small = doc("PO-S", &[("M", 1)]);
        small.total_amount = 10.0;
        small.line_items[0].color = "Sand Stone".to_string();
        let mut large = doc("PO-L", &[("S", 1), ("L", 2)]);
        large.total_amount = 500.0;
        large.line_items[0].model_id = "HOOD-9".to_string();
        repo.upsert(&small).await.unwrap();
        repo.upsert(&large).await.unwrap();

        let by_color = repo
            .list_orders(&OrderQuery {
                color: Some("sand".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_color.total, 1);
        assert_eq!(by_color.orders[0].purchase_order_id, "PO-S");

        let by_size = repo
            .list_orders(&OrderQuery {
                size: Some("L".to_string()),
                model_id: Some("hood".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_size.total, 1);
        assert_eq!(by_size.orders[0].purchase_order_id, "PO-L");

        let cheapest_first = repo
            .list_orders(&OrderQuery {
                sort_by: SortField::TotalAmount,
                sort_order: SortOrder::Asc,
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(cheapest_first.total, 2);
        assert_eq!(cheapest_first.orders.len(), 1);
        assert_eq!(cheapest_first.orders[0].purchase_order_id, "PO-S");

        let filters = repo.distinct_filters().await.unwrap();
        assert_eq!(filters.model_ids, vec!["HOOD-9".to_string(), "M-1".to_string()]);
        assert_eq!(filters.colors, vec!["Sand Stone".to_string()]);
        assert_eq!(filters.sizes, vec!["L".to_string(), "M".to_string(), "S".to_string()]);
    }
}
