use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Actor;
use crate::config::AdminRestockPolicy;
use crate::errors::ServiceError;
use crate::events::RefreshTopic;
use crate::models::order::{Order, OrderStatus};

use super::orders::OrderWorkflow;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: Option<String>,
    /// Free-text shipment location; always adds a timeline row
    #[serde(default)]
    #[validate(length(min = 1, max = 200))]
    pub current_location: Option<String>,
}

impl OrderWorkflow {
    /// Administrative status change.
    ///
    /// Never refunds. Cancelling here puts stock back according to the
    /// configured [`AdminRestockPolicy`].
    #[instrument(skip(self, request), fields(order_id = %order_id, status = %request.status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        request: UpdateStatusRequest,
        actor: Actor,
    ) -> Result<Order, ServiceError> {
        if !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "Administrator role required".to_string(),
            ));
        }
        request.validate()?;

        let _guard = self.lock_order(order_id).await;
        let mut order = self.load(order_id).await?;
        let previous = order.status;
        let now = Utc::now();

        let changed = order.transition_to(request.status, now)?;
        if let Some(tracking) = request.tracking_number {
            order.tracking_number = Some(tracking);
            order.updated_at = now;
        }
        if let Some(location) = request.current_location {
            order.update_location(&location, now);
        }

        let order = self.orders.save(&order).await?;
        info!(%previous, current = %order.status, changed, "order status updated");

        if changed && order.status == OrderStatus::Cancelled {
            self.restock_cancelled_order(&order).await;
        }

        let mut topics = vec![RefreshTopic::Orders, RefreshTopic::Order(order.id)];
        if changed && order.status == OrderStatus::Cancelled {
            topics.push(RefreshTopic::Products);
        }
        self.publish(&topics);
        Ok(order)
    }

    async fn restock_cancelled_order(&self, order: &Order) {
        let lines: Vec<_> = match self.restock_policy {
            AdminRestockPolicy::AllItems => order.items.iter().collect(),
            AdminRestockPolicy::UncancelledItems => order.active_items().collect(),
        };
        for item in lines {
            if let Err(e) = self
                .catalog
                .restore_stock(item.product_id, item.quantity)
                .await
            {
                metrics::counter!("stock_restore_failed_total", 1);
                error!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    error = %e,
                    "failed to restore stock for cancelled order"
                );
            }
        }
    }
}
