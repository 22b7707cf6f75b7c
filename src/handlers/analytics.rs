use axum::{extract::State, response::Json, routing::get, Router};

use crate::{
    auth::AdminUser, errors::ServiceError, services::OrderAnalytics, ApiResponse, AppState,
};

/// Build the analytics Router scoped under `/api/v1/analytics`.
pub fn analytics_routes() -> Router<AppState> {
    Router::new().route("/orders", get(get_order_analytics))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/orders",
    summary = "Order analytics",
    responses(
        (status = 200, description = "Order metrics retrieved", body = ApiResponse<OrderAnalytics>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Administrator role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Analytics"
)]
pub async fn get_order_analytics(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<ApiResponse<OrderAnalytics>>, ServiceError> {
    let summary = state.workflow.summary().await?;
    Ok(Json(ApiResponse::success(summary)))
}
