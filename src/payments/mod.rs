//! Payment gateway capability.
//!
//! The workflow talks to the gateway only through [`PaymentGateway`]; the
//! production implementation is the REST client in [`client`], and
//! signature checks are done locally by [`signature::SignatureVerifier`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

pub mod address;
pub mod client;
pub mod signature;

pub use address::{recover_address, AddressSource};
pub use client::HttpPaymentGateway;
pub use signature::SignatureVerifier;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("payment gateway timed out")]
    Timeout,

    #[error("payment gateway unreachable: {0}")]
    Transport(String),

    #[error("{description}")]
    Api { status: u16, description: String },

    #[error("unexpected payment gateway response: {0}")]
    Decode(String),

    #[error("payment gateway temporarily unavailable")]
    CircuitOpen,

    #[error("payment gateway is not configured")]
    NotConfigured,
}

/// Gateway-side order created before checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentIntent {
    pub id: String,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    /// Free-form key/value bag; may carry a captured shipping address
    #[serde(default)]
    pub notes: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub notes: Value,
    #[serde(default)]
    pub customer_details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    #[serde(default)]
    pub payment_id: Option<String>,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a gateway order for `amount` minor units.
    async fn create_intent(&self, amount: i64, receipt: &str)
        -> Result<PaymentIntent, GatewayError>;

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError>;

    async fn fetch_order(&self, gateway_order_id: &str) -> Result<GatewayOrder, GatewayError>;

    /// Refunds `amount` minor units of `payment_id`.
    async fn refund(
        &self,
        payment_id: &str,
        amount: i64,
        notes: &HashMap<String, String>,
    ) -> Result<Refund, GatewayError>;
}

/// Stand-in used when no gateway credentials are configured. Every call
/// fails, so gateway refunds fail closed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGateway;

#[async_trait]
impl PaymentGateway for DisabledGateway {
    async fn create_intent(&self, _: i64, _: &str) -> Result<PaymentIntent, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn fetch_payment(&self, _: &str) -> Result<GatewayPayment, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn fetch_order(&self, _: &str) -> Result<GatewayOrder, GatewayError> {
        Err(GatewayError::NotConfigured)
    }

    async fn refund(
        &self,
        _: &str,
        _: i64,
        _: &HashMap<String, String>,
    ) -> Result<Refund, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}
