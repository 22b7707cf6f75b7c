use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::{AdminUser, AuthUser, OptionalAuthUser},
    errors::ServiceError,
    models::{Order, OrderStatus, OrderView, PaymentProofInput},
    services::{BulkCancellation, CreateOrderRequest, UpdateStatusRequest, DEFAULT_PAGE_SIZE},
    ApiResponse, AppState, PaginatedResponse,
};

/// Build the orders Router scoped under `/api/v1/orders`.
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/payment", post(confirm_payment))
        .route("/:id/status", put(update_order_status))
        .route("/:id/items/:item_id/cancel", post(cancel_order_item))
        .route("/:id/cancel", post(cancel_order))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OrderListQuery {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Filter by lifecycle status
    pub status: Option<OrderStatus>,
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    DEFAULT_PAGE_SIZE
}

/// Place an order. Guests may check out without a token.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<Order>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    security((), ("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    OptionalAuthUser(user): OptionalAuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Order>>), ServiceError> {
    let order = state.workflow.create_order(request, user.into()).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// List orders, newest first. Customers only see their own.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<Order>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<Order>>>, ServiceError> {
    let page = state
        .workflow
        .list_orders(auth_user.actor(), query.page, query.limit, query.status)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        page.orders,
        page.total,
        query.page,
        query.limit,
    ))))
}

/// Fetch one order with live cancellability flags.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller does not own the order", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    OptionalAuthUser(user): OptionalAuthUser,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let view = state.workflow.get_order(id, user.into()).await?;
    Ok(Json(ApiResponse::success(view)))
}

/// Attach a verified gateway payment to a pending order.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment",
    summary = "Confirm payment",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = PaymentProofInput,
    responses(
        (status = 200, description = "Payment confirmed", body = ApiResponse<Order>),
        (status = 400, description = "Signature mismatch or wrong stage", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already paid", body = crate::errors::ErrorResponse),
    ),
    security((), ("Bearer" = [])),
    tag = "Orders"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    OptionalAuthUser(user): OptionalAuthUser,
    Json(proof): Json<PaymentProofInput>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state
        .workflow
        .confirm_payment(id, proof, user.into())
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Administrative status change.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Update order status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<Order>),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AdminUser(admin): AdminUser,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state
        .workflow
        .update_status(id, request, admin.actor())
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel a single line, refunding it when the order is paid.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/items/{item_id}/cancel",
    summary = "Cancel order item",
    params(
        ("id" = Uuid, Path, description = "Order id"),
        ("item_id" = Uuid, Path, description = "Order item id"),
    ),
    responses(
        (status = 200, description = "Item cancelled", body = ApiResponse<Order>),
        (status = 400, description = "Item or order not cancellable", body = crate::errors::ErrorResponse),
        (status = 403, description = "Caller does not own the order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Item already cancelled", body = crate::errors::ErrorResponse),
        (status = 502, description = "Refund failed, nothing changed", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Order>>, ServiceError> {
    let order = state
        .workflow
        .cancel_item(id, item_id, auth_user.actor())
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Cancel every cancellable line with one combined refund.
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Eligible items cancelled", body = ApiResponse<BulkCancellation>),
        (status = 400, description = "No cancellable items", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<BulkCancellation>>, ServiceError> {
    let outcome = state.workflow.cancel_all(id, auth_user.actor()).await?;
    let mut response = ApiResponse::success(outcome);
    if let Some(reason) = response
        .data
        .as_ref()
        .and_then(|outcome| outcome.refund_error.as_ref())
    {
        response.message = Some(format!("Items cancelled but the refund failed: {reason}"));
    }
    Ok(Json(response))
}
