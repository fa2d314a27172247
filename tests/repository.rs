use std::sync::Arc;

use serde_json::json;
use sqlx::SqlitePool;
use tempfile::TempDir;

use po_intake::repository::SqliteOrderRepository;
use po_intake::{db, migrate};
use po_intake_core::models::{OrderDocument, PersistedLineItem};
use po_intake_core::store::{OrderQuery, OrderRepository, SortField, SortOrder};

async fn setup() -> (TempDir, SqliteOrderRepository) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("data/orders.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    (tmp, SqliteOrderRepository::new(pool))
}

fn order(value: serde_json::Value) -> OrderDocument {
    serde_json::from_value(value).unwrap()
}

fn spring_order() -> OrderDocument {
    order(json!({
        "purchase_order_id": "PO-7781",
        "order_date": "2025-03-14",
        "buyer": { "name": "Northwind Retail", "address": "1 Harbour St" },
        "supplier": { "name": "Acme Apparel", "address": "Dock 4" },
        "currency": "EUR",
        "tax_amount": 21.0,
        "total_amount": 231.0,
        "line_items": [
            {
                "model_id": "M-100",
                "item_code": "TSHIRT-01",
                "description": "Crew neck tee",
                "color": "sand stone",
                "sizes": { "XS": 0, "S": 0, "M": 12, "L": 8 },
                "unit_price": 10.5,
                "delivery_date": "2025-04-01"
            }
        ]
    }))
}

fn revised_order() -> OrderDocument {
    order(json!({
        "purchase_order_id": "PO-7781",
        "buyer": { "name": "Northwind Retail", "address": "1 Harbour St" },
        "supplier": { "name": "Acme Apparel", "address": "Dock 4" },
        "currency": "EUR",
        "total_amount": 60.0,
        "line_items": [
            {
                "model_id": "M-200",
                "item_code": "HOODIE-02",
                "color": "black",
                "sizes": { "S": 3, "M": 0 },
                "unit_price": 20.0
            }
        ]
    }))
}

fn shape(items: &[PersistedLineItem]) -> Vec<(String, String, u32, f64)> {
    items
        .iter()
        .map(|i| (i.item_code.clone(), i.size.clone(), i.quantity, i.amount))
        .collect()
}

async fn line_item_rows(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM line_items")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_zero_sizes_produce_no_rows() {
    let (_tmp, repo) = setup().await;
    let outcome = repo.upsert(&spring_order()).await.unwrap();
    assert!(!outcome.is_duplicate);

    let stored = repo.get_order("PO-7781").await.unwrap().unwrap();
    assert_eq!(stored.id, outcome.order_id);
    assert_eq!(
        shape(&stored.line_items),
        vec![
            ("TSHIRT-01".to_string(), "M".to_string(), 12, 126.0),
            ("TSHIRT-01".to_string(), "L".to_string(), 8, 84.0),
        ]
    );
    assert_eq!(stored.currency, "EUR");
    assert_eq!(stored.order_date.unwrap().to_string(), "2025-03-14");
    assert_eq!(
        stored.line_items[0].delivery_date.unwrap().to_string(),
        "2025-04-01"
    );
}

#[tokio::test]
async fn test_second_upsert_replaces_line_items() {
    let (_tmp, repo) = setup().await;
    let first = repo.upsert(&spring_order()).await.unwrap();
    let second = repo.upsert(&revised_order()).await.unwrap();

    assert!(second.is_duplicate);
    assert_eq!(first.order_id, second.order_id);

    let stored = repo.get_order(&first.order_id).await.unwrap().unwrap();
    assert_eq!(
        shape(&stored.line_items),
        vec![("HOODIE-02".to_string(), "S".to_string(), 3, 60.0)]
    );
    assert_eq!(stored.total_amount, 60.0);
    assert_eq!(stored.order_date, None);
    assert_eq!(line_item_rows(repo.pool()).await, 1);
}

#[tokio::test]
async fn test_unchanged_reupsert_is_duplicate_with_same_rows() {
    let (_tmp, repo) = setup().await;
    repo.upsert(&spring_order()).await.unwrap();
    let before = repo.get_order("PO-7781").await.unwrap().unwrap();

    let again = repo.upsert(&spring_order()).await.unwrap();
    assert!(again.is_duplicate);

    let after = repo.get_order("PO-7781").await.unwrap().unwrap();
    assert_eq!(shape(&before.line_items), shape(&after.line_items));
    assert_eq!(before.created_at, after.created_at);
    assert_eq!(repo.stats().await.unwrap().total_orders, 1);
}

#[tokio::test]
async fn test_invalid_order_writes_nothing() {
    let (_tmp, repo) = setup().await;
    let mut bad = spring_order();
    bad.line_items[0].unit_price = -1.0;

    assert!(repo.upsert(&bad).await.is_err());
    assert_eq!(repo.stats().await.unwrap().total_orders, 0);
    assert_eq!(line_item_rows(repo.pool()).await, 0);
}

#[tokio::test]
async fn test_delete_cascades() {
    let (_tmp, repo) = setup().await;
    repo.upsert(&spring_order()).await.unwrap();
    assert_eq!(line_item_rows(repo.pool()).await, 2);

    assert!(repo.delete_order("PO-7781").await.unwrap());
    assert!(!repo.delete_order("PO-7781").await.unwrap());
    assert!(repo.get_order("PO-7781").await.unwrap().is_none());
    assert_eq!(line_item_rows(repo.pool()).await, 0);
}

#[tokio::test]
async fn test_list_search_and_stats() {
    let (_tmp, repo) = setup().await;
    repo.upsert(&spring_order()).await.unwrap();
    repo.upsert(&order(json!({
        "purchase_order_id": "PO-9000",
        "buyer": { "name": "Contoso" },
        "total_amount": 100.0,
        "line_items": [{ "item_code": "CAP", "sizes": { "OS": 5 }, "unit_price": 20.0 }]
    })))
    .await
    .unwrap();

    let all = repo.list_orders(&OrderQuery::default()).await.unwrap();
    assert_eq!(all.orders.len(), 2);
    assert_eq!(all.total, 2);

    let hits = repo
        .list_orders(&OrderQuery {
            search: Some("northwind".to_string()),
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(hits.total, 1);
    assert_eq!(hits.orders[0].purchase_order_id, "PO-7781");
    assert_eq!(hits.orders[0].line_item_count, 2);

    let page = repo
        .list_orders(&OrderQuery {
            limit: 1,
            offset: 1,
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(page.orders.len(), 1);
    assert_eq!(page.total, 2);

    let stats = repo.stats().await.unwrap();
    assert_eq!(stats.total_orders, 2);
    assert_eq!(stats.total_line_items, 3);
    assert_eq!(stats.total_value, 331.0);
    assert_eq!(stats.distinct_buyers, 2);
}

#[tokio::test]
async fn test_concurrent_upserts_share_one_order() {
    let (_tmp, repo) = setup().await;
    let repo = Arc::new(repo);

    let mut handles = Vec::new();
    for _ in 0..4 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.upsert(&spring_order()).await.unwrap()
        }));
    }
    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap());
    }

    assert_eq!(outcomes.iter().filter(|o| !o.is_duplicate).count(), 1);
    assert!(outcomes.windows(2).all(|w| w[0].order_id == w[1].order_id));
    assert_eq!(repo.stats().await.unwrap().total_orders, 1);
    assert_eq!(line_item_rows(repo.pool()).await, 2);
}

#[tokio::test]
async fn test_failure_mid_transaction_rolls_back_everything() {
    let (_tmp, repo) = setup().await;
    repo.upsert(&spring_order()).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_line_items BEFORE INSERT ON line_items \
         BEGIN SELECT RAISE(ABORT, 'line items rejected'); END",
    )
    .execute(repo.pool())
    .await
    .unwrap();

    // Order row update and line item delete succeed before the insert fails.
    let err = repo.upsert(&revised_order()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("line items rejected"), "{:#}", err);

    let stored = repo.get_order("PO-7781").await.unwrap().unwrap();
    assert_eq!(stored.total_amount, 231.0);
    assert_eq!(stored.order_date.unwrap().to_string(), "2025-03-14");
    assert_eq!(
        shape(&stored.line_items),
        vec![
            ("TSHIRT-01".to_string(), "M".to_string(), 12, 126.0),
            ("TSHIRT-01".to_string(), "L".to_string(), 8, 84.0),
        ]
    );
    assert_eq!(line_item_rows(repo.pool()).await, 2);
}

fn pos(page: &po_intake_core::store::OrderPage) -> Vec<&str> {
    page.orders
        .iter()
        .map(|o| o.purchase_order_id.as_str())
        .collect()
}

#[tokio::test]
async fn test_line_item_filters_sort_and_distinct_values() {
    let (_tmp, repo) = setup().await;
    repo.upsert(&spring_order()).await.unwrap();
    repo.upsert(&order(json!({
        "purchase_order_id": "PO-9000",
        "order_date": "2025-05-01",
        "buyer": { "name": "Contoso" },
        "total_amount": 100.0,
        "line_items": [
            { "model_id": "M-200", "item_code": "CAP", "color": "Black", "sizes": { "OS": 5 }, "unit_price": 20.0 }
        ]
    })))
    .await
    .unwrap();
    repo.upsert(&order(json!({
        "purchase_order_id": "PO-0001",
        "buyer": { "name": "Fabrikam" },
        "total_amount": 5.0,
        "line_items": []
    })))
    .await
    .unwrap();

    let by_color = repo
        .list_orders(&OrderQuery {
            color: Some("STONE".to_string()),
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(pos(&by_color), vec!["PO-7781"]);
    assert_eq!(by_color.total, 1);

    let by_model = repo
        .list_orders(&OrderQuery {
            model_id: Some("m-2".to_string()),
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(pos(&by_model), vec!["PO-9000"]);

    // Size is an exact match
    let exact = repo
        .list_orders(&OrderQuery {
            size: Some("M".to_string()),
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(pos(&exact), vec!["PO-7781"]);

    let combined = repo
        .list_orders(&OrderQuery {
            size: Some("OS".to_string()),
            color: Some("sand".to_string()),
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(combined.total, 0);
    assert!(combined.orders.is_empty());

    let blank = repo
        .list_orders(&OrderQuery {
            color: Some("  ".to_string()),
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(blank.total, 3);

    // Default: order_date descending, undated orders last
    let by_date = repo.list_orders(&OrderQuery::default()).await.unwrap();
    assert_eq!(pos(&by_date), vec!["PO-9000", "PO-7781", "PO-0001"]);

    let by_amount = repo
        .list_orders(&OrderQuery {
            sort_by: SortField::TotalAmount,
            sort_order: SortOrder::Asc,
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(pos(&by_amount), vec!["PO-0001", "PO-9000", "PO-7781"]);

    let by_items = repo
        .list_orders(&OrderQuery {
            sort_by: SortField::ItemCount,
            limit: 1,
            ..OrderQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(pos(&by_items), vec!["PO-7781"]);
    assert_eq!(by_items.total, 3);

    let filters = repo.distinct_filters().await.unwrap();
    assert_eq!(filters.model_ids, vec!["M-100".to_string(), "M-200".to_string()]);
    assert_eq!(filters.colors, vec!["Black".to_string(), "sand stone".to_string()]);
    assert_eq!(
        filters.sizes,
        vec!["L".to_string(), "M".to_string(), "OS".to_string()]
    );
}
