use axum::{response::Json, routing::get, Router};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront order backend

Checkout with gateway payment verification, the order lifecycle,
customer cancellations with refunds, and live refresh signals.

## Authentication

Send `Authorization: Bearer <jwt>`. Checkout and payment confirmation
accept anonymous requests; everything else needs a token.

## Errors

Failures return an `ErrorResponse` with a stable `code` clients can branch on.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "Orders", description = "Checkout, lifecycle and cancellation"),
        (name = "Payments", description = "Payment gateway intents"),
        (name = "Events", description = "Live refresh signals"),
        (name = "Analytics", description = "Order metrics"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::confirm_payment,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order_item,
        crate::handlers::orders::cancel_order,
        crate::handlers::payments::create_payment_intent,
        crate::handlers::events::subscribe,
        crate::handlers::analytics::get_order_analytics,
        crate::handlers::health::health_check,
        crate::handlers::health::api_status,
    ),
    components(
        schemas(
            crate::models::Order,
            crate::models::OrderView,
            crate::models::OrderStatus,
            crate::services::CreateOrderRequest,
            crate::services::UpdateStatusRequest,
            crate::services::CreatePaymentIntentRequest,
            crate::services::BulkCancellation,
            crate::services::OrderAnalytics,
            crate::events::RefreshSignal,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDocV1::openapi()) }),
    )
}
