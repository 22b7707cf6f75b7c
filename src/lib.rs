//! Storefront API Library
//!
//! Order backend for a storefront: checkout with payment verification, the
//! order lifecycle, customer cancellations with refunds and live refresh
//! signals for connected clients.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod models;
pub mod notifications;
pub mod openapi;
pub mod payments;
pub mod repositories;
pub mod services;
pub mod tracing;

use std::{sync::Arc, time::Duration};

use axum::{extract::FromRef, routing::get, Router};
use chrono::Utc;
use http::{HeaderName, HeaderValue};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tokio::sync::broadcast;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::events::RefreshSignal;
use crate::services::OrderWorkflow;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub workflow: Arc<OrderWorkflow>,
    /// Live refresh fan-out; each SSE client holds a receiver
    pub refresh: broadcast::Sender<RefreshSignal>,
    /// `None` when running on in-memory stores
    pub db: Option<Arc<DatabaseConnection>>,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let page = page.max(1);
        let limit = limit.clamp(1, services::MAX_PAGE_SIZE);
        Self {
            items,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/payments", handlers::payments::payments_routes())
        .nest("/events", handlers::events::events_routes())
        .nest("/analytics", handlers::analytics::analytics_routes())
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Full application router with the middleware stack applied.
pub fn build_router(state: AppState) -> Router {
    let request_id_header = HeaderName::from_static(crate::tracing::REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/status", get(handlers::health::api_status))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::openapi_routes())
        .layer(axum::middleware::from_fn(
            crate::tracing::request_id_middleware,
        ))
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors_layer(&state.config))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}
