//! Order aggregate.
//!
//! An [`Order`] is created once, then mutated in place by payment
//! confirmation, administrative status changes and customer cancellations.
//! Every mutation path appends to the timeline; the timeline is never edited.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::OrderError;

pub const LABEL_PLACED: &str = "Placed";
pub const LABEL_ITEM_CANCELLED: &str = "Item Cancelled";
pub const LABEL_REFUND_INITIATED: &str = "Refund Initiated";
pub const LABEL_REFUND_FAILED: &str = "Refund Failed";
pub const LABEL_BULK_CANCELLATION: &str = "Bulk Cancellation";
pub const LABEL_LOCATION_UPDATE: &str = "Location Update";

/// Lifecycle status of an order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Capitalized name used for timeline rows.
    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Shipped => "Shipped",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Customers may only cancel before the order leaves the warehouse.
    pub fn accepts_cancellation(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Processing => 1,
            Self::Shipped => 2,
            Self::Delivered => 3,
            Self::Cancelled => 4,
        }
    }

    /// Whether the administrative path may move an order from `self` to `next`.
    ///
    /// Staying on the same status is always allowed so tracking and location
    /// updates can be posted without a transition.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Cancelled => self.accepts_cancellation(),
            _ => next.rank() > self.rank(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Gateway,
    CashOnDelivery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub full_name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
}

impl ShippingAddress {
    /// All fields a courier needs are present.
    pub fn is_complete(&self) -> bool {
        [
            &self.full_name,
            &self.street,
            &self.city,
            &self.state,
            &self.postal_code,
            &self.country,
            &self.phone,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }
}

/// Client-submitted proof that the gateway captured a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentProofInput {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PaymentProof {
    pub gateway_order_id: String,
    pub gateway_payment_id: String,
    pub signature: String,
    pub verified: bool,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Pricing {
    pub items_subtotal: Decimal,
    pub tax: Decimal,
    pub shipping: Decimal,
    pub grand_total: Decimal,
}

impl Pricing {
    pub fn validate(&self) -> Result<(), OrderError> {
        let parts = [
            ("items_subtotal", self.items_subtotal),
            ("tax", self.tax),
            ("shipping", self.shipping),
            ("grand_total", self.grand_total),
        ];
        if let Some((name, _)) = parts.iter().find(|(_, value)| value.is_sign_negative()) {
            return Err(OrderError::InvalidPricing(format!("{name} must not be negative")));
        }
        let expected = self
            .items_subtotal
            .checked_add(self.tax)
            .and_then(|sum| sum.checked_add(self.shipping))
            .ok_or_else(|| OrderError::InvalidPricing("pricing out of range".to_string()))?;
        if expected != self.grand_total {
            return Err(OrderError::InvalidPricing(format!(
                "grand_total {} does not equal items_subtotal + tax + shipping ({})",
                self.grand_total, expected
            )));
        }
        to_minor_units(self.grand_total)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TimelineEntry {
    pub status: String,
    pub comment: String,
    pub timestamp: DateTime<Utc>,
}

/// A line of an order. Product data is snapshotted at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub image: Option<String>,
    #[serde(default)]
    pub is_cancelled: bool,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
}

fn line_total(unit_price: Decimal, quantity: u32) -> Result<Decimal, OrderError> {
    unit_price
        .checked_mul(Decimal::from(quantity))
        .ok_or_else(|| OrderError::InvalidPricing("line total out of range".to_string()))
}

impl OrderItem {
    pub fn line_total(&self) -> Result<Decimal, OrderError> {
        line_total(self.unit_price, self.quantity)
    }

    /// Refund owed for this line, in the gateway's minor currency unit.
    pub fn refund_minor_units(&self) -> Result<i64, OrderError> {
        to_minor_units(self.line_total()?)
    }
}

/// Converts a major-unit amount to minor units (paise, cents), rounding half
/// away from zero. Amounts that do not fit an `i64` are rejected.
pub fn to_minor_units(amount: Decimal) -> Result<i64, OrderError> {
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|minor| minor.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| OrderError::InvalidPricing(format!("amount {amount} out of range")))
}

/// Sums per-line refunds. Each line is rounded on its own, matching what a
/// single-item cancellation of that line would refund.
pub fn refund_total<'a>(items: impl IntoIterator<Item = &'a OrderItem>) -> Result<i64, OrderError> {
    items.into_iter().try_fold(0i64, |total, item| {
        total
            .checked_add(item.refund_minor_units()?)
            .ok_or_else(|| OrderError::InvalidPricing("refund total out of range".to_string()))
    })
}

/// Checks cart lines before anything is written: at least one line, every
/// quantity positive, no negative price, and the whole order expressible in
/// minor units.
pub fn validate_lines(items: &[NewOrderItem]) -> Result<(), OrderError> {
    if items.is_empty() {
        return Err(OrderError::EmptyOrder);
    }
    let mut total = 0i64;
    for item in items {
        if item.quantity == 0 {
            return Err(OrderError::InvalidQuantity(item.product_id));
        }
        if item.unit_price.is_sign_negative() && !item.unit_price.is_zero() {
            return Err(OrderError::InvalidPricing(format!(
                "unit price for {} must not be negative",
                item.name
            )));
        }
        let minor = to_minor_units(line_total(item.unit_price, item.quantity)?)?;
        total = total
            .checked_add(minor)
            .ok_or_else(|| OrderError::InvalidPricing("order total out of range".to_string()))?;
    }
    Ok(())
}

/// A cart line submitted for checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NewOrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    /// Never empty on a stored order; only read views take the lines out.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<OrderItem>,
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: PaymentMethod,
    pub payment_proof: Option<PaymentProof>,
    pub pricing: Pricing,
    pub status: OrderStatus,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub tracking_number: Option<String>,
    pub current_location: Option<String>,
    pub timeline: Vec<TimelineEntry>,
    /// Bumped by the repository on every successful save.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a `pending` order with a single "Placed" timeline row.
    pub fn place(
        items: Vec<NewOrderItem>,
        owner_id: Option<Uuid>,
        shipping_address: Option<ShippingAddress>,
        payment_method: PaymentMethod,
        pricing: Pricing,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        validate_lines(&items)?;
        pricing.validate()?;

        let items = items
            .into_iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                product_id: item.product_id,
                name: item.name,
                unit_price: item.unit_price,
                quantity: item.quantity,
                image: item.image,
                is_cancelled: false,
                cancelled_at: None,
            })
            .collect();

        let mut order = Self {
            id: Uuid::new_v4(),
            owner_id,
            items,
            shipping_address,
            payment_method,
            payment_proof: None,
            pricing,
            status: OrderStatus::Pending,
            is_paid: false,
            paid_at: None,
            is_delivered: false,
            delivered_at: None,
            cancelled_at: None,
            tracking_number: None,
            current_location: None,
            timeline: Vec::new(),
            revision: 0,
            created_at: now,
            updated_at: now,
        };
        order.record(LABEL_PLACED, "Order placed successfully", now);
        Ok(order)
    }

    /// Appends a timeline row. Timestamps never go backwards even if the
    /// clock does.
    pub fn record(&mut self, status: &str, comment: impl Into<String>, now: DateTime<Utc>) {
        let timestamp = match self.timeline.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.timeline.push(TimelineEntry {
            status: status.to_string(),
            comment: comment.into(),
            timestamp,
        });
        self.updated_at = timestamp;
    }

    /// Marks the order paid from a verified gateway proof and advances it to
    /// `processing`.
    pub fn confirm_payment(&mut self, proof: PaymentProofInput, now: DateTime<Utc>) {
        self.is_paid = true;
        self.paid_at = Some(now);
        self.payment_proof = Some(PaymentProof {
            gateway_order_id: proof.gateway_order_id,
            gateway_payment_id: proof.gateway_payment_id,
            signature: proof.signature,
            verified: true,
            paid_at: now,
        });
        self.status = OrderStatus::Processing;
        self.record(
            OrderStatus::Processing.label(),
            "Payment confirmed, order is being processed",
            now,
        );
    }

    /// Gateway payment id, if this order was paid through the gateway.
    pub fn gateway_payment_id(&self) -> Option<&str> {
        if !self.is_paid || self.payment_method != PaymentMethod::Gateway {
            return None;
        }
        self.payment_proof
            .as_ref()
            .map(|proof| proof.gateway_payment_id.as_str())
    }

    pub fn item(&self, item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|item| item.id == item_id)
    }

    pub fn ensure_cancellable_stage(&self) -> Result<(), OrderError> {
        if self.status.accepts_cancellation() {
            Ok(())
        } else {
            Err(OrderError::InvalidStage(self.status))
        }
    }

    /// Flags a line as cancelled. A cancelled line never reverts.
    pub fn cancel_item(&mut self, item_id: Uuid, now: DateTime<Utc>) -> Result<(), OrderError> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == item_id)
            .ok_or(OrderError::ItemNotFound(item_id))?;
        if item.is_cancelled {
            return Err(OrderError::AlreadyCancelled(item_id));
        }
        item.is_cancelled = true;
        item.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn all_items_cancelled(&self) -> bool {
        self.items.iter().all(|item| item.is_cancelled)
    }

    /// Moves the whole order to `cancelled` once its last line is cancelled.
    /// Returns whether the promotion happened.
    pub fn promote_if_fully_cancelled(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == OrderStatus::Cancelled || !self.all_items_cancelled() {
            return false;
        }
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.record(
            OrderStatus::Cancelled.label(),
            "All items cancelled, order cancelled",
            now,
        );
        true
    }

    /// Administrative status change. Returns whether `status` changed.
    pub fn transition_to(
        &mut self,
        target: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        if !self.status.can_transition_to(target) {
            return Err(OrderError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        if self.status == target {
            return Ok(false);
        }
        self.record(
            target.label(),
            format!("Order status updated to {}", target.label()),
            now,
        );
        self.status = target;
        match target {
            OrderStatus::Delivered => {
                self.is_delivered = true;
                self.delivered_at = Some(now);
            }
            OrderStatus::Cancelled => {
                self.cancelled_at = Some(now);
            }
            _ => {}
        }
        Ok(true)
    }

    pub fn update_location(&mut self, location: &str, now: DateTime<Utc>) {
        self.current_location = Some(location.to_string());
        self.record(LABEL_LOCATION_UPDATE, format!("Arrived at {location}"), now);
    }

    pub fn active_items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.iter().filter(|item| !item.is_cancelled)
    }

    pub fn cancelled_item_count(&self) -> usize {
        self.items.iter().filter(|item| item.is_cancelled).count()
    }
}
