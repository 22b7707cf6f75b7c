use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::order::OrderStatus;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Bad Request")
    pub error: String,
    /// Stable machine-readable error kind (e.g. "insufficient_stock")
    pub code: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

/// Rejections raised by the order workflow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order must contain at least one item")]
    EmptyOrder,

    #[error("Quantity must be at least 1 for product {0}")]
    InvalidQuantity(Uuid),

    #[error("Product {0} not found")]
    ProductNotFound(Uuid),

    #[error("Insufficient stock for {name}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        name: String,
        requested: u32,
        available: i64,
    },

    #[error("Shipping address is required")]
    MissingShippingAddress,

    #[error("Payment signature verification failed")]
    InvalidPaymentSignature,

    #[error("Invalid pricing: {0}")]
    InvalidPricing(String),

    #[error("Payment for this order is already confirmed")]
    PaymentAlreadyConfirmed,

    #[error("Order is not payable through the payment gateway")]
    PaymentMethodMismatch,

    #[error("Order cannot be changed while it is {0}")]
    InvalidStage(OrderStatus),

    #[error("Cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Item {0} not found in order")]
    ItemNotFound(Uuid),

    #[error("Item {0} is already cancelled")]
    AlreadyCancelled(Uuid),

    #[error("Item {0} is not cancellable")]
    NotCancellable(Uuid),

    #[error("No cancellable items in this order")]
    NoCancellableItems,

    #[error("Refund failed: {0}")]
    RefundFailed(String),
}

impl OrderError {
    /// Stable identifier clients can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyOrder => "empty_order",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::ProductNotFound(_) => "product_not_found",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::MissingShippingAddress => "missing_shipping_address",
            Self::InvalidPaymentSignature => "invalid_payment_signature",
            Self::InvalidPricing(_) => "invalid_pricing",
            Self::PaymentAlreadyConfirmed => "payment_already_confirmed",
            Self::PaymentMethodMismatch => "payment_method_mismatch",
            Self::InvalidStage(_) => "invalid_stage",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ItemNotFound(_) => "item_not_found",
            Self::AlreadyCancelled(_) => "already_cancelled",
            Self::NotCancellable(_) => "not_cancellable",
            Self::NoCancellableItems => "no_cancellable_items",
            Self::RefundFailed(_) => "refund_failed",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProductNotFound(_) | Self::ItemNotFound(_) => StatusCode::NOT_FOUND,
            Self::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::AlreadyCancelled(_) | Self::PaymentAlreadyConfirmed => StatusCode::CONFLICT,
            Self::RefundFailed(_) => StatusCode::BAD_GATEWAY,
            Self::EmptyOrder
            | Self::InvalidQuantity(_)
            | Self::MissingShippingAddress
            | Self::InvalidPaymentSignature
            | Self::InvalidPricing(_)
            | Self::PaymentMethodMismatch
            | Self::InvalidStage(_)
            | Self::InvalidTransition { .. }
            | Self::NotCancellable(_)
            | Self::NoCancellableItems => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Order(err) => err.status_code(),
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Order(err) => err.code(),
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::DatabaseError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::SerializationError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// The workflow rejection carried by this error, if any.
    pub fn order_error(&self) -> Option<&OrderError> {
        match self {
            Self::Order(err) => Some(err),
            _ => None,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
