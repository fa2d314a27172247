//! Order validation and line-item fan-out.
//!
//! Every repository implementation runs incoming documents through
//! [`validate_order`] and stores the rows produced by [`fan_out`], so the
//! "one row per non-zero size" rule lives in exactly one place.

use uuid::Uuid;

use crate::models::{OrderDocument, PersistedLineItem};

/// Why an extracted order cannot be stored.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OrderValidationError {
    #[error("purchase_order_id is missing or empty")]
    MissingPurchaseOrderId,
    #[error("line item {index} has a negative unit price ({unit_price})")]
    NegativeUnitPrice { index: usize, unit_price: f64 },
    #[error("{field} is not a finite number")]
    NonFiniteAmount { field: &'static str },
}

pub fn validate_order(doc: &OrderDocument) -> Result<(), OrderValidationError> {
    if doc.purchase_order_id.trim().is_empty() {
        return Err(OrderValidationError::MissingPurchaseOrderId);
    }
    if !doc.total_amount.is_finite() {
        return Err(OrderValidationError::NonFiniteAmount { field: "total_amount" });
    }
    if !doc.tax_amount.is_finite() {
        return Err(OrderValidationError::NonFiniteAmount { field: "tax_amount" });
    }
    for (index, item) in doc.line_items.iter().enumerate() {
        if !item.unit_price.is_finite() {
            return Err(OrderValidationError::NonFiniteAmount { field: "unit_price" });
        }
        if item.unit_price < 0.0 {
            return Err(OrderValidationError::NegativeUnitPrice {
                index,
                unit_price: item.unit_price,
            });
        }
    }
    Ok(())
}

/// Flattens the size breakdowns of `doc` into stored rows.
///
/// One row per `(line item, size)` with a quantity above zero, in document
/// order; `amount = unit_price * quantity`. Zero-quantity sizes produce
/// nothing.
pub fn fan_out(order_id: &str, doc: &OrderDocument) -> Vec<PersistedLineItem> {
    doc.line_items
        .iter()
        .flat_map(|item| {
            item.sizes
                .iter()
                .filter(|(_, quantity)| *quantity > 0)
                .map(move |(size, quantity)| PersistedLineItem {
                    id: Uuid::new_v4().to_string(),
                    order_id: order_id.to_string(),
                    model_id: item.model_id.clone(),
                    item_code: item.item_code.clone(),
                    description: item.description.clone(),
                    color: item.color.clone(),
                    size: size.to_string(),
                    quantity,
                    unit_price: item.unit_price,
                    amount: item.unit_price * f64::from(quantity),
                    delivery_date: item.delivery_date,
                })
        })
        .collect()
}
