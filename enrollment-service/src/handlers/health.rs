use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;

use crate::dtos::HealthResponse;
use crate::AppState;

/// Liveness plus a database ping. Answers 503 while the store is unreachable.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.tokens.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                database: "ok".to_string(),
                timestamp: Utc::now(),
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    database: "unreachable".to_string(),
                    timestamp: Utc::now(),
                }),
            )
        }
    }
}
