use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::models::order::{Order, OrderStatus};

use super::orders::OrderWorkflow;

/// Admin dashboard numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderAnalytics {
    pub total_orders: u64,
    /// Keyed by lowercase status; every status is present
    pub orders_by_status: BTreeMap<String, u64>,
    pub paid_orders: u64,
    /// Sum of grand totals over paid orders that are not cancelled
    pub gross_revenue: Decimal,
    pub average_order_value: Decimal,
    pub cancelled_items: u64,
    pub generated_at: DateTime<Utc>,
}

impl OrderAnalytics {
    pub fn from_orders(orders: &[Order]) -> Self {
        let mut orders_by_status: BTreeMap<String, u64> = [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ]
        .into_iter()
        .map(|status| (status.to_string(), 0))
        .collect();

        let mut paid_orders = 0u64;
        let mut revenue_orders = 0u64;
        let mut gross_revenue = Decimal::ZERO;
        let mut cancelled_items = 0u64;

        for order in orders {
            *orders_by_status.entry(order.status.to_string()).or_default() += 1;
            cancelled_items += order.cancelled_item_count() as u64;
            if order.is_paid {
                paid_orders += 1;
                if order.status != OrderStatus::Cancelled {
                    revenue_orders += 1;
                    gross_revenue += order.pricing.grand_total;
                }
            }
        }

        let average_order_value = if revenue_orders == 0 {
            Decimal::ZERO
        } else {
            (gross_revenue / Decimal::from(revenue_orders)).round_dp(2)
        };

        Self {
            total_orders: orders.len() as u64,
            orders_by_status,
            paid_orders,
            gross_revenue,
            average_order_value,
            cancelled_items,
            generated_at: Utc::now(),
        }
    }
}

impl OrderWorkflow {
    #[instrument(skip(self))]
    pub async fn summary(&self) -> Result<OrderAnalytics, ServiceError> {
        let orders = self.orders.all().await?;
        Ok(OrderAnalytics::from_orders(&orders))
    }
}
