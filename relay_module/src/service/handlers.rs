use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tokio::task;
use tracing::{error, info};

use super::state::AppState;

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// POST /webhook
pub(super) async fn ingest_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    info!(
        "webhook received content_type={} bytes={}",
        content_type.as_deref().unwrap_or("-"),
        body.len()
    );

    let pipeline = state.pipeline.clone();
    let outcome =
        match task::spawn_blocking(move || pipeline.handle(content_type.as_deref(), &body)).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!("spawn_blocking panicked: {}", err);
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "Internal server error"})),
                );
            }
        };

    (outcome.status(), Json(outcome.body()))
}
