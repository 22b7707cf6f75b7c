use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::Actor;
use crate::errors::{OrderError, ServiceError};
use crate::events::RefreshTopic;
use crate::models::order::{
    refund_total, Order, OrderItem, LABEL_BULK_CANCELLATION, LABEL_ITEM_CANCELLED,
    LABEL_REFUND_FAILED, LABEL_REFUND_INITIATED,
};

use super::orders::OrderWorkflow;

/// Result of cancelling every eligible line.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkCancellation {
    pub order: Order,
    pub cancelled_items: usize,
    /// Refund requested from the gateway, in minor currency units; zero for
    /// unpaid orders
    pub refund_amount: i64,
    pub refund_id: Option<String>,
    /// Gateway description when the refund could not be issued
    pub refund_error: Option<String>,
}

/// Reapply attempts after a refund went out but the save lost a revision race.
const MAX_SAVE_RETRIES: u32 = 3;

fn major_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

fn refund_notes(order_id: Uuid, reason: &str) -> HashMap<String, String> {
    HashMap::from([
        ("order_id".to_string(), order_id.to_string()),
        ("reason".to_string(), reason.to_string()),
    ])
}

impl OrderWorkflow {
    async fn restore_lines(&self, order_id: Uuid, lines: &[OrderItem]) {
        for item in lines {
            if let Err(e) = self
                .catalog
                .restore_stock(item.product_id, item.quantity)
                .await
            {
                metrics::counter!("stock_restore_failed_total", 1);
                error!(
                    %order_id,
                    product_id = %item.product_id,
                    error = %e,
                    "failed to restore stock for cancelled item"
                );
            }
        }
    }

    /// Applies `apply` to `order` and saves it. Once money has moved, a lost
    /// revision race reloads the order and applies the change again instead
    /// of sending the caller back to retry (and refund) a second time.
    async fn save_after_refund<F>(
        &self,
        mut order: Order,
        refund_id: Option<&str>,
        mut apply: F,
    ) -> Result<Order, ServiceError>
    where
        F: FnMut(&mut Order) -> Result<(), ServiceError> + Send,
    {
        let order_id = order.id;
        let mut attempts = 0;
        let result = loop {
            let outcome = match apply(&mut order) {
                Ok(()) => self.orders.save(&order).await,
                Err(e) => Err(e),
            };
            match outcome {
                Err(ServiceError::ConcurrentModification(_))
                    if refund_id.is_some() && attempts < MAX_SAVE_RETRIES =>
                {
                    attempts += 1;
                    metrics::counter!("order_save_retries_total", 1);
                    warn!(attempts, "order changed after refund, reapplying cancellation");
                    match self.load(order_id).await {
                        Ok(fresh) => order = fresh,
                        Err(e) => break Err(e),
                    }
                }
                outcome => break outcome,
            }
        };

        if let (Err(e), Some(refund_id)) = (&result, refund_id) {
            metrics::counter!("refunds_unrecorded_total", 1);
            error!(%refund_id, error = %e, "refund issued but cancellation not saved");
        }
        result
    }

    /// Cancels one line at the customer's request.
    ///
    /// A paid line is refunded first; if the refund fails nothing changes.
    #[instrument(skip(self), fields(order_id = %order_id, item_id = %item_id))]
    pub async fn cancel_item(
        &self,
        order_id: Uuid,
        item_id: Uuid,
        actor: Actor,
    ) -> Result<Order, ServiceError> {
        let _guard = self.lock_order(order_id).await;
        let order = self.load(order_id).await?;
        Self::authorize_owner(actor, &order)?;
        order.ensure_cancellable_stage()?;

        let item = order
            .item(item_id)
            .cloned()
            .ok_or(OrderError::ItemNotFound(item_id))?;
        if item.is_cancelled {
            return Err(OrderError::AlreadyCancelled(item_id).into());
        }
        let cancellable = self
            .catalog
            .get_product(item.product_id)
            .await?
            .map_or(false, |product| product.is_cancellable);
        if !cancellable {
            return Err(OrderError::NotCancellable(item_id).into());
        }

        let amount = item.refund_minor_units()?;
        let refund = match order.gateway_payment_id() {
            Some(payment_id) if amount > 0 => {
                match self
                    .gateway
                    .refund(payment_id, amount, &refund_notes(order.id, "item_cancelled"))
                    .await
                {
                    Ok(refund) => {
                        metrics::counter!("refunds_issued_total", 1, "kind" => "item");
                        Some(refund)
                    }
                    Err(e) => {
                        metrics::counter!("refunds_failed_total", 1, "kind" => "item");
                        warn!(error = %e, "refund failed, item left untouched");
                        return Err(OrderError::RefundFailed(e.to_string()).into());
                    }
                }
            }
            _ => None,
        };

        let now = Utc::now();
        let mut promoted = false;
        let order = self
            .save_after_refund(order, refund.as_ref().map(|r| r.id.as_str()), |order| {
                order.cancel_item(item_id, now)?;
                if let Some(refund) = &refund {
                    order.record(
                        LABEL_REFUND_INITIATED,
                        format!(
                            "Refund {} of {} initiated for {}",
                            refund.id,
                            major_units(refund.amount),
                            item.name
                        ),
                        now,
                    );
                }
                order.record(
                    LABEL_ITEM_CANCELLED,
                    format!("{} (x{}) cancelled", item.name, item.quantity),
                    now,
                );
                promoted = order.promote_if_fully_cancelled(now);
                Ok(())
            })
            .await?;
        self.restore_lines(order.id, std::slice::from_ref(&item)).await;

        metrics::counter!("order_items_cancelled_total", 1);
        info!(promoted, refunded = refund.is_some(), "order item cancelled");
        self.publish(&[
            RefreshTopic::Orders,
            RefreshTopic::Order(order.id),
            RefreshTopic::Products,
        ]);
        Ok(order)
    }

    /// Cancels every line that is still cancellable.
    ///
    /// Lines are cancelled even if the single summed refund fails; the
    /// failure is written to the timeline for manual follow-up.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_all(
        &self,
        order_id: Uuid,
        actor: Actor,
    ) -> Result<BulkCancellation, ServiceError> {
        let _guard = self.lock_order(order_id).await;
        let order = self.load(order_id).await?;
        Self::authorize_owner(actor, &order)?;
        order.ensure_cancellable_stage()?;

        let ids: Vec<Uuid> = order.active_items().map(|item| item.product_id).collect();
        let products = self.catalog.get_products(&ids).await?;
        let eligible: Vec<OrderItem> = order
            .active_items()
            .filter(|item| {
                products
                    .get(&item.product_id)
                    .map_or(false, |product| product.is_cancellable)
            })
            .cloned()
            .collect();
        if eligible.is_empty() {
            return Err(OrderError::NoCancellableItems.into());
        }

        // Rounded per line so the total equals the sum of single-item refunds.
        let refund_amount = refund_total(&eligible)?;

        let mut refund = None;
        let mut refund_error = None;
        let mut refund_requested = 0i64;
        if let Some(payment_id) = order.gateway_payment_id() {
            if refund_amount > 0 {
                refund_requested = refund_amount;
                match self
                    .gateway
                    .refund(payment_id, refund_amount, &refund_notes(order.id, "bulk_cancellation"))
                    .await
                {
                    Ok(issued) => {
                        metrics::counter!("refunds_issued_total", 1, "kind" => "bulk");
                        refund = Some(issued);
                    }
                    Err(e) => {
                        metrics::counter!("refunds_failed_total", 1, "kind" => "bulk");
                        warn!(error = %e, amount = refund_amount, "bulk refund failed, items stay cancelled");
                        refund_error = Some(e.to_string());
                    }
                }
            }
        }

        let now = Utc::now();
        let mut promoted = false;
        let mut cancelled: Vec<OrderItem> = Vec::new();
        let order = self
            .save_after_refund(order, refund.as_ref().map(|r| r.id.as_str()), |order| {
                cancelled.clear();
                for item in &eligible {
                    if order.item(item.id).map_or(false, |line| !line.is_cancelled) {
                        order.cancel_item(item.id, now)?;
                        cancelled.push(item.clone());
                    }
                }
                if let Some(refund) = &refund {
                    order.record(
                        LABEL_REFUND_INITIATED,
                        format!(
                            "Refund {} of {} initiated for {} item(s)",
                            refund.id,
                            major_units(refund.amount),
                            eligible.len()
                        ),
                        now,
                    );
                }
                if let Some(e) = &refund_error {
                    order.record(
                        LABEL_REFUND_FAILED,
                        format!("Refund of {} failed: {}", major_units(refund_amount), e),
                        now,
                    );
                }
                promoted = order.promote_if_fully_cancelled(now);
                order.record(
                    LABEL_BULK_CANCELLATION,
                    format!("{} item(s) cancelled", cancelled.len()),
                    now,
                );
                Ok(())
            })
            .await?;
        self.restore_lines(order.id, &cancelled).await;

        metrics::counter!("order_items_cancelled_total", cancelled.len() as u64);
        info!(
            cancelled = cancelled.len(),
            promoted,
            refund_amount,
            refund_failed = refund_error.is_some(),
            "bulk cancellation complete"
        );
        self.publish(&[
            RefreshTopic::Orders,
            RefreshTopic::Order(order.id),
            RefreshTopic::Products,
        ]);

        Ok(BulkCancellation {
            order,
            cancelled_items: cancelled.len(),
            refund_amount: refund_requested,
            refund_id: refund.map(|r| r.id),
            refund_error,
        })
    }
}
