use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{db, ApiResponse, AppState};

/// Component health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
    /// Running without that component configured
    Disabled,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub database: ComponentHealth,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub environment: String,
}

/// Liveness plus a database ping. Returns 503 when the database is down.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = ApiResponse<HealthResponse>),
        (status = 503, description = "Database unreachable", body = ApiResponse<HealthResponse>),
    ),
    tag = "Health"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let database = match &state.db {
        Some(pool) => {
            let start = Instant::now();
            let status = match db::check_connection(pool).await {
                Ok(()) => ComponentStatus::Up,
                Err(e) => {
                    tracing::warn!(error = %e, "database health check failed");
                    ComponentStatus::Down
                }
            };
            ComponentHealth {
                status,
                latency_ms: Some(start.elapsed().as_millis() as u64),
            }
        }
        None => ComponentHealth {
            status: ComponentStatus::Disabled,
            latency_ms: None,
        },
    };

    let (code, status) = if database.status == ComponentStatus::Down {
        (StatusCode::SERVICE_UNAVAILABLE, ComponentStatus::Down)
    } else {
        (StatusCode::OK, ComponentStatus::Up)
    };

    (
        code,
        Json(ApiResponse::success(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
        })),
    )
}

#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Service metadata", body = ApiResponse<StatusResponse>)),
    tag = "Health"
)]
pub async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<StatusResponse>> {
    Json(ApiResponse::success(StatusResponse {
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.environment.clone(),
    }))
}
