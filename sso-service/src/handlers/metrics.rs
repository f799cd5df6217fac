use service_core::axum::http::header::CONTENT_TYPE;
use service_core::axum::response::IntoResponse;

/// Prometheus text exposition of everything recorded through `metrics`.
pub async fn metrics() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::services::metrics::get_metrics(),
    )
}
