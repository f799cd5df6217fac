//! SSO access-grant and ticket-validation core.
//!
//! Ticket issuance and redemption live in [`services::TicketRegistry`],
//! per-resource grants behind [`access::Access`], and the session-wide
//! operations (validate, logout, expiration) in [`services::SsoService`].
//! The HTTP surface is operational only: health and metrics.

pub mod access;
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;

use crate::config::SsoConfig;
use crate::services::SsoService;
use service_core::axum::{extract::State, middleware::from_fn, routing::get, Json, Router};
use service_core::error::AppError;
use service_core::middleware::{metrics_middleware, request_id_middleware};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: SsoConfig,
    pub sso: Arc<SsoService>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !state.sso.sessions().health_check().await {
        tracing::error!("Session store health check failed");
        return Err(AppError::ServiceUnavailable);
    }

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "registry": {
            "tickets": state.sso.registry().len(),
        },
        "sessions": state.sso.sessions().len(),
        "checks": {
            "store": "up"
        }
    })))
}
