use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::models::{RepoStatus, ScoredChunk, SearchRequest, SearchResponse};
use crate::state::AppState;

/// POST /api/search - Hybrid retrieval over one repo
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let query = req.query.trim().to_string();
    if query.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Query is required".to_string()));
    }
    let top_n = req.top_n.unwrap_or(state.config.retrieval.top_n);

    let results = run_search(&state, req.repo_id, &query, top_n).await?;
    Ok(Json(SearchResponse { query, results }))
}

/// Shared by search and ask.
pub async fn run_search(
    state: &AppState,
    repo_id: Uuid,
    query: &str,
    top_n: usize,
) -> Result<Vec<ScoredChunk>, (StatusCode, String)> {
    let repo = state
        .find_repo(repo_id)
        .ok_or((StatusCode::NOT_FOUND, "Repo not found".to_string()))?;
    let indexed = state.indexed(repo_id).ok_or_else(|| {
        let reason = match repo.status {
            RepoStatus::Error(e) => format!("Repo failed to index: {e}"),
            _ => "Repo is not ready yet".to_string(),
        };
        (StatusCode::CONFLICT, reason)
    })?;

    let results = state
        .retriever
        .retrieve_scored(query, &indexed.bundle, &indexed.corpus, top_n)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Search failed: {e:#}"),
            )
        })?;

    tracing::info!(
        "Search in {}: {} results for {:?}",
        repo.name,
        results.len(),
        query
    );
    Ok(results)
}
