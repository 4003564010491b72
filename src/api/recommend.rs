use axum::extract::State;
use axum::Json;

use crate::models::{RecommendationRequest, RecommendationResponse, SearchRequest};
use crate::orchestrator::prompt::clean_query;
use crate::state::AppState;

const RECOMMENDATIONS: usize = 10;
const RELATED_PROJECTS: usize = 6;
const SEARCH_RESULTS: usize = 6;

/// POST /recommendations
pub async fn recommendations(
    State(state): State<AppState>,
    Json(req): Json<RecommendationRequest>,
) -> Json<RecommendationResponse> {
    Json(similar_ids(&state, &req.query_text, RECOMMENDATIONS, "recommendations").await)
}

/// POST /related-projects
pub async fn related_projects(
    State(state): State<AppState>,
    Json(req): Json<RecommendationRequest>,
) -> Json<RecommendationResponse> {
    Json(similar_ids(&state, &req.query_text, RELATED_PROJECTS, "related-projects").await)
}

/// POST /search-projects
pub async fn search_projects(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Json<RecommendationResponse> {
    Json(similar_ids(&state, &req.search_query, SEARCH_RESULTS, "search-projects").await)
}

/// Ids of the documents nearest to `text`. Failures are logged and become
/// an empty list.
async fn similar_ids(
    state: &AppState,
    text: &str,
    limit: usize,
    endpoint: &str,
) -> RecommendationResponse {
    let text = clean_query(text, state.config.max_query_len);
    if text.is_empty() {
        return RecommendationResponse::default();
    }

    match state.knowledge.query_similar_ids(&text, limit).await {
        Ok(recommended_ids) => RecommendationResponse { recommended_ids },
        Err(e) => {
            tracing::error!("Error in {endpoint} endpoint: {e:#}");
            RecommendationResponse::default()
        }
    }
}
