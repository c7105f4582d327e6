use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::api::search::run_search;
use crate::llm::chat::collect_answers;
use crate::llm::consensus::consensus_or_first_valid;
use crate::llm::prompt::{
    build_prompt, sanitize_for_prompt, sanitize_history, truncate_to_char_boundary,
    PromptContext, MAX_QUESTION_LEN,
};
use crate::models::{AskRequest, AskResponse, ChatMessage};
use crate::state::AppState;

/// POST /api/ask - Answer a question about one repo.
///
/// Retrieval, every configured model, then consensus over their answers.
/// The whole request is bounded by `query_timeout_secs`; on timeout the
/// in-flight model calls are dropped.
pub async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, String)> {
    // ── Step 1: Validate and sanitize input ───────────────
    let question = req.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question is required".to_string()));
    }
    let question = sanitize_for_prompt(&truncate_to_char_boundary(question, MAX_QUESTION_LEN));
    let history = sanitize_history(req.history);
    let top_n = req.top_n.unwrap_or(state.config.retrieval.top_n);

    // ── Step 2: Acquire semaphore ─────────────────────────
    let _permit = state.ask_semaphore.acquire().await.map_err(|_| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Ask service at capacity".to_string(),
        )
    })?;

    let timeout = Duration::from_secs(state.config.query_timeout_secs);
    match tokio::time::timeout(
        timeout,
        answer(&state, req.repo_id, &question, &history, top_n),
    )
    .await
    {
        Ok(result) => result.map(Json),
        Err(_) => {
            tracing::warn!("Question timed out after {}s", timeout.as_secs());
            Err((
                StatusCode::GATEWAY_TIMEOUT,
                format!("Question timed out after {}s", timeout.as_secs()),
            ))
        }
    }
}

async fn answer(
    state: &AppState,
    repo_id: Uuid,
    question: &str,
    history: &[ChatMessage],
    top_n: usize,
) -> Result<AskResponse, (StatusCode, String)> {
    // ── Step 3: Retrieve context ──────────────────────────
    let hits = run_search(state, repo_id, question, top_n).await?;
    let repo = state
        .find_repo(repo_id)
        .ok_or((StatusCode::NOT_FOUND, "Repo not found".to_string()))?;

    // ── Step 4: Build prompt ──────────────────────────────
    let documents: Vec<_> = hits.into_iter().map(|h| h.chunk).collect();
    let prompt = build_prompt(&PromptContext {
        repo_name: &repo.name,
        repo_url: &repo.url,
        file_type_counts: &repo.file_type_counts,
        documents: &documents,
        history,
        question,
    });

    // ── Step 5: Ask every model ───────────────────────────
    let candidates = collect_answers(&state.models, &prompt).await;
    let answered = candidates.iter().filter(|c| c.text().is_some()).count();
    tracing::info!(
        "{answered}/{} models answered for {}",
        candidates.len(),
        repo.name
    );

    // ── Step 6: Consensus ─────────────────────────────────
    let result = consensus_or_first_valid(&candidates, state.retriever.embedder()).await;

    let mut sources: Vec<String> = Vec::with_capacity(documents.len());
    for doc in &documents {
        if !sources.contains(&doc.source_path) {
            sources.push(doc.source_path.clone());
        }
    }

    Ok(AskResponse {
        answer: result.text,
        winner: result.winner,
        scores: result.scores,
        fallback: result.fallback,
        candidates,
        sources,
    })
}
