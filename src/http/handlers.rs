//! Request handlers.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use super::{AppError, AppState};
use crate::proxy::{ConnectionStatus, QueryRequest, QueryResult};

/// Response body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: ConnectionStatus,
    pub timestamp: String,
}

/// POST /api/query - Execute a statement on the shared connection.
pub(crate) async fn query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResult>, AppError> {
    let Json(request) = body.map_err(|rejection| {
        warn!(error = %rejection.body_text(), "Rejecting malformed query body");
        AppError::BadRequest(rejection.body_text())
    })?;

    let result = state.proxy.execute(&request).await?;
    Ok(Json(result))
}

/// GET /health - Liveness plus database readiness.
pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        database: state.proxy.status(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// GET /metrics - Prometheus text exposition.
pub(crate) async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
