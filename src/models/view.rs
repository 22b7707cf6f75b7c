//! Read models returned to clients.

use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::order::{Order, OrderItem};
use crate::repositories::Product;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderItemView {
    #[serde(flatten)]
    pub item: OrderItem,
    /// Computed against the live catalog at read time
    pub is_cancellable: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    /// Replaces `order.items` with cancellability attached
    pub items: Vec<OrderItemView>,
    /// True iff at least one item is currently cancellable
    pub is_cancellable: bool,
}

impl OrderView {
    /// An item is cancellable when it is not yet cancelled, its product is
    /// still flagged cancellable, and the order has not left the warehouse.
    /// Lines whose product disappeared from the catalog are not cancellable.
    pub fn build(mut order: Order, products: &HashMap<Uuid, Product>) -> Self {
        let stage_ok = order.status.accepts_cancellation();
        let items: Vec<OrderItemView> = std::mem::take(&mut order.items)
            .into_iter()
            .map(|item| {
                let product_ok = products
                    .get(&item.product_id)
                    .map_or(false, |product| product.is_cancellable);
                OrderItemView {
                    is_cancellable: stage_ok && !item.is_cancelled && product_ok,
                    item,
                }
            })
            .collect();
        let is_cancellable = items.iter().any(|item| item.is_cancellable);
        Self {
            order,
            items,
            is_cancellable,
        }
    }
}
