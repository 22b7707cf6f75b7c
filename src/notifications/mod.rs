use thiserror::Error;
use tracing::debug;

use crate::events::{Event, EventSendError, EventSender, OrderConfirmation, RefreshTopic};
use crate::models::order::Order;
use crate::repositories::User;

pub mod mailer;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("recipient has no email address")]
    NoRecipient,
    #[error(transparent)]
    Queue(#[from] EventSendError),
}

/// Best-effort side channel for order changes. Implementations must not
/// block; the workflow logs failures and carries on.
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send + Sync {
    fn send_order_confirmation(&self, order: &Order, user: &User) -> Result<(), NotificationError>;

    /// Tells live clients the listed views are stale.
    fn publish(&self, topics: &[RefreshTopic]) -> Result<(), NotificationError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl NotificationSink for NoopNotifier {
    fn send_order_confirmation(&self, _: &Order, _: &User) -> Result<(), NotificationError> {
        Ok(())
    }

    fn publish(&self, _: &[RefreshTopic]) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Hands notifications to the background event processor.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    events: EventSender,
}

impl ChannelNotifier {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl NotificationSink for ChannelNotifier {
    fn send_order_confirmation(&self, order: &Order, user: &User) -> Result<(), NotificationError> {
        let email = user
            .email
            .as_deref()
            .filter(|email| !email.trim().is_empty())
            .ok_or(NotificationError::NoRecipient)?;
        self.events
            .try_send(Event::OrderConfirmation(OrderConfirmation {
                order_id: order.id,
                recipient_name: user.name.clone(),
                recipient_email: email.to_string(),
                item_count: order.items.len(),
                grand_total: order.pricing.grand_total,
                placed_at: order.created_at,
            }))?;
        debug!(order_id = %order.id, "order confirmation queued");
        Ok(())
    }

    fn publish(&self, topics: &[RefreshTopic]) -> Result<(), NotificationError> {
        Ok(self.events.try_send(Event::Refresh(topics.to_vec()))?)
    }
}
