//! Background delivery of order side effects.
//!
//! The workflow never waits on these: events are pushed with `try_send`
//! onto a bounded queue and [`process_events`] drains it, sending mail and
//! fanning refresh signals out to live clients.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::notifications::mailer::{render_order_confirmation, Mailer};

/// A cached client view that has gone stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshTopic {
    Orders,
    Order(Uuid),
    Products,
}

impl RefreshTopic {
    /// Channel name sent to subscribers, e.g. `orders` or `order:<id>`.
    pub fn channel(&self) -> String {
        match self {
            RefreshTopic::Orders => "orders".to_string(),
            RefreshTopic::Order(id) => format!("order:{id}"),
            RefreshTopic::Products => "products".to_string(),
        }
    }
}

/// Payload for the confirmation mail, captured when the order is placed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub recipient_name: String,
    pub recipient_email: String,
    pub item_count: usize,
    pub grand_total: Decimal,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderConfirmation(OrderConfirmation),
    Refresh(Vec<RefreshTopic>),
}

/// What live subscribers receive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RefreshSignal {
    pub topics: Vec<String>,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventSendError {
    #[error("event queue is full")]
    Full,
    #[error("event processor has stopped")]
    Closed,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Enqueues without waiting; a full queue drops the event.
    pub fn try_send(&self, event: Event) -> Result<(), EventSendError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EventSendError::Full,
            mpsc::error::TrySendError::Closed(_) => EventSendError::Closed,
        })
    }
}

/// Drains the event queue until every sender is dropped.
pub async fn process_events(
    mut rx: mpsc::Receiver<Event>,
    mailer: Arc<dyn Mailer>,
    refresh: broadcast::Sender<RefreshSignal>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::OrderConfirmation(confirmation) => {
                let message = render_order_confirmation(&confirmation);
                if let Err(e) = mailer.send(&message).await {
                    metrics::counter!("notifications_failed_total", 1, "kind" => "email");
                    error!(
                        order_id = %confirmation.order_id,
                        error = %e,
                        "Failed to send order confirmation"
                    );
                }
            }
            Event::Refresh(topics) => {
                let signal = RefreshSignal {
                    topics: topics.iter().map(RefreshTopic::channel).collect(),
                    emitted_at: Utc::now(),
                };
                // No subscribers is not an error.
                let receivers = refresh.send(signal).unwrap_or(0);
                debug!(receivers, ?topics, "refresh signal broadcast");
            }
        }
    }

    info!("Event processing loop stopped");
}
