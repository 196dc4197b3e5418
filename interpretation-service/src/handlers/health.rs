use crate::services::metrics::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Local;
use serde_json::json;

/// `GET /health/`: liveness only, no dependencies touched.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "Service is running",
        "timestamp": Local::now().to_rfc3339(),
    }))
}

/// `GET /ready`: reachable task store.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "service": state.config.service_name,
                "version": env!("CARGO_PKG_VERSION"),
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "service": state.config.service_name,
                    "error": e.to_string(),
                })),
            )
        }
    }
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics() -> impl IntoResponse {
    (
        [("content-type", "text/plain; version=0.0.4")],
        get_metrics(),
    )
}
