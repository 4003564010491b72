pub mod chat;
pub mod recommend;

use axum::routing::{get, post};
use axum::{Json, Router};

use crate::models::HealthResponse;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat::chat))
        .route("/recommendations", post(recommend::recommendations))
        .route("/related-projects", post(recommend::related_projects))
        .route("/search-projects", post(recommend::search_projects))
        .route("/health", get(health))
        .with_state(state)
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}
