use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};

use crate::{
    errors::ServiceError, payments::PaymentIntent, services::CreatePaymentIntentRequest,
    ApiResponse, AppState,
};

/// Build the payments Router scoped under `/api/v1/payments`.
pub fn payments_routes() -> Router<AppState> {
    Router::new().route("/intents", post(create_payment_intent))
}

/// Open a gateway order for the client-side checkout widget.
#[utoipa::path(
    post,
    path = "/api/v1/payments/intents",
    summary = "Create payment intent",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 201, description = "Gateway order created", body = ApiResponse<PaymentIntent>),
        (status = 400, description = "Invalid amount", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn create_payment_intent(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentIntentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentIntent>>), ServiceError> {
    let intent = state.workflow.create_payment_intent(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(intent))))
}
