//! `orders` and `stats` commands: read-side access to stored orders.

use anyhow::{bail, Result};

use po_intake_core::store::{OrderQuery, OrderRepository};

use crate::config::Config;
use crate::db;
use crate::repository::SqliteOrderRepository;

async fn open(config: &Config) -> Result<SqliteOrderRepository> {
    Ok(SqliteOrderRepository::new(db::connect(config).await?))
}

pub async fn run_list(config: &Config, query: OrderQuery) -> Result<()> {
    let repo = open(config).await?;
    let page = repo.list_orders(&query).await?;
    let orders = page.orders;

    if orders.is_empty() {
        println!("No orders.");
    } else {
        println!(
            "{:<20} {:<10} {:<24} {:<24} {:>12} {:>5}",
            "PO", "DATE", "BUYER", "SUPPLIER", "TOTAL", "LINES"
        );
        println!("{}", "-".repeat(100));
        for o in &orders {
            let date = o
                .order_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<20} {:<10} {:<24} {:<24} {:>8.2} {:<3} {:>5}",
                truncate(&o.purchase_order_id, 20),
                date,
                truncate(&o.buyer_name, 24),
                truncate(&o.supplier_name, 24),
                o.total_amount,
                o.currency,
                o.line_item_count
            );
        }
        println!();
        println!(
            "showing {}-{} of {}",
            query.offset.max(0) + 1,
            query.offset.max(0) + orders.len() as i64,
            page.total
        );
    }
    repo.pool().close().await;
    Ok(())
}

pub async fn run_get(config: &Config, key: &str) -> Result<()> {
    let repo = open(config).await?;
    let Some(order) = repo.get_order(key).await? else {
        bail!("Order not found: {}", key);
    };

    println!("--- Order ---");
    println!("id:                {}", order.id);
    println!("purchase_order_id: {}", order.purchase_order_id);
    if let Some(date) = order.order_date {
        println!("order_date:        {}", date);
    }
    println!("buyer:             {}", order.buyer.name);
    if !order.buyer.address.is_empty() {
        println!("buyer_address:     {}", order.buyer.address);
    }
    println!("supplier:          {}", order.supplier.name);
    if !order.supplier.address.is_empty() {
        println!("supplier_address:  {}", order.supplier.address);
    }
    println!("currency:          {}", order.currency);
    println!("tax_amount:        {:.2}", order.tax_amount);
    println!("total_amount:      {:.2}", order.total_amount);
    println!("created_at:        {}", order.created_at.to_rfc3339());
    println!("updated_at:        {}", order.updated_at.to_rfc3339());
    println!();

    println!("--- Line items ({}) ---", order.line_items.len());
    for item in &order.line_items {
        let delivery = item
            .delivery_date
            .map(|d| d.to_string())
            .unwrap_or_default();
        println!(
            "{:<12} {:<16} {:<12} {:<6} {:>6} x {:>9.2} = {:>10.2} {}",
            item.model_id,
            item.item_code,
            item.color,
            item.size,
            item.quantity,
            item.unit_price,
            item.amount,
            delivery
        );
    }
    repo.pool().close().await;
    Ok(())
}

pub async fn run_delete(config: &Config, key: &str) -> Result<()> {
    let repo = open(config).await?;
    let deleted = repo.delete_order(key).await?;
    repo.pool().close().await;
    if !deleted {
        bail!("Order not found: {}", key);
    }
    println!("deleted: {}", key);
    println!("ok");
    Ok(())
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let repo = open(config).await?;
    let stats = repo.stats().await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("po-intake Order Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Orders:      {}", stats.total_orders);
    println!("  Line items:  {}", stats.total_line_items);
    println!("  Total value: {:.2}", stats.total_value);
    println!("  Buyers:      {}", stats.distinct_buyers);
    println!();
    repo.pool().close().await;
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
