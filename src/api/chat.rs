use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::models::{ChatRequest, ChatResponse};
use crate::state::AppState;

/// POST /chat - answer one query. Any answer, including a failure message,
/// is a 200; only saturation is an error status.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let _permit = state
        .chat_semaphore
        .clone()
        .try_acquire_owned()
        .map_err(|_| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Chat service at capacity".to_string(),
            )
        })?;

    let answer = state.orchestrator.answer(&req.query).await;
    Ok(Json(ChatResponse { answer }))
}
