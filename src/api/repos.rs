use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::chunking::build_corpus;
use crate::git::{normalize_repo_url, repo_name_from_url, walk_repo_files};
use crate::models::{AddRepoRequest, Repo, RepoStatus};
use crate::search::vector::VectorStore;
use crate::state::{AppState, IndexedRepo};

/// Every dense collection is named `repo-<uuid>`.
const COLLECTION_PREFIX: &str = "repo";

/// GET /api/repos - List all repos
pub async fn list_repos(State(state): State<AppState>) -> Json<Vec<Repo>> {
    Json(state.repos.read().clone())
}

/// POST /api/repos - Add a new repo (clone + index in background)
pub async fn add_repo(
    State(state): State<AppState>,
    Json(req): Json<AddRepoRequest>,
) -> Result<(StatusCode, Json<Repo>), (StatusCode, String)> {
    let input = req.url.trim();
    if input.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "URL is required".to_string()));
    }
    let url = normalize_repo_url(input);

    // Reject duplicate URLs and enforce repo limit
    {
        let repos = state.repos.read();
        if repos.iter().any(|r| r.url == url) {
            return Err((
                StatusCode::CONFLICT,
                "A repo with this URL has already been added".to_string(),
            ));
        }
        if repos.len() >= state.config.max_repos {
            return Err((
                StatusCode::BAD_REQUEST,
                format!(
                    "Maximum number of repos ({}) reached",
                    state.config.max_repos
                ),
            ));
        }
    }

    let repo = Repo {
        id: Uuid::new_v4(),
        url: url.clone(),
        name: repo_name_from_url(&url),
        status: RepoStatus::Cloning,
        added_at: Utc::now(),
        indexed_at: None,
        file_count: 0,
        chunk_count: 0,
        file_type_counts: Default::default(),
        collection_name: None,
    };

    state.repos.write().push(repo.clone());
    state.persist_repos();

    // Spawn background task to clone and index
    let repo_id = repo.id;
    let task_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = clone_and_index(&task_state, repo_id, &url).await {
            tracing::error!("Failed to clone and index {url}: {e:#}");
            task_state.set_status(repo_id, RepoStatus::Error(format!("{e:#}")));
            task_state.persist_repos();
        }
    });

    Ok((StatusCode::CREATED, Json(repo)))
}

/// DELETE /api/repos/{id} - Remove a repo, its indices and its clone
pub async fn delete_repo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let repo = state
        .find_repo(id)
        .ok_or((StatusCode::NOT_FOUND, "Repo not found".to_string()))?;
    if matches!(repo.status, RepoStatus::Cloning | RepoStatus::Indexing) {
        return Err((
            StatusCode::CONFLICT,
            "Repo is still being processed".to_string(),
        ));
    }

    if let Some(indexed) = state.remove_index(id) {
        if let Err(e) = indexed.bundle.retire(state.store.as_ref()) {
            tracing::warn!("Failed to delete dense collection for {}: {e:#}", repo.name);
        }
    }
    if let Some(name) = &repo.collection_name {
        if let Err(e) = state.store.delete_collection(name) {
            tracing::warn!("Failed to delete collection {name}: {e:#}");
        }
    }

    state.remove_corpus(id);
    let repo_dir = state.repo_dir(id);
    if repo_dir.exists() {
        let _ = std::fs::remove_dir_all(&repo_dir);
    }

    state.repos.write().retain(|r| r.id != id);
    state.persist_repos();
    tracing::info!("Deleted repo {}", repo.name);

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/repos/{id}/reindex - Build a fresh index generation
pub async fn reindex_repo(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    // Check and claim under one lock so concurrent requests start one build
    let repo = {
        let mut repos = state.repos.write();
        let repo = repos
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or((StatusCode::NOT_FOUND, "Repo not found".to_string()))?;
        if !matches!(repo.status, RepoStatus::Ready | RepoStatus::Error(_)) {
            return Err((
                StatusCode::CONFLICT,
                "Repo must be in ready or error state to re-index".to_string(),
            ));
        }
        repo.status = RepoStatus::Indexing;
        repo.clone()
    };
    state.persist_repos();

    let task_state = state.clone();
    tokio::spawn(async move {
        let result = if task_state.repo_dir(id).exists() {
            index_repo(&task_state, id).await
        } else {
            // Clone was removed from disk; fetch it again
            clone_and_index(&task_state, id, &repo.url).await
        };
        if let Err(e) = result {
            tracing::error!("Failed to re-index {}: {e:#}", repo.name);
            task_state.set_status(id, RepoStatus::Error(format!("{e:#}")));
            task_state.persist_repos();
        }
    });

    Ok(StatusCode::ACCEPTED)
}

/// Clone a repo (with timeout), then index it.
async fn clone_and_index(state: &AppState, repo_id: Uuid, url: &str) -> anyhow::Result<()> {
    let repo_dir = state.repo_dir(repo_id);

    {
        let _permit = state
            .clone_semaphore
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("Clone semaphore closed"))?;

        state.set_status(repo_id, RepoStatus::Cloning);
        if repo_dir.exists() {
            std::fs::remove_dir_all(&repo_dir)?;
        }

        let url_owned = url.to_string();
        let target = repo_dir.clone();
        let timeout = std::time::Duration::from_secs(state.config.clone_timeout_secs);
        let clone_result = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || crate::git::clone_repo(&url_owned, &target)),
        )
        .await;

        match clone_result {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => anyhow::bail!("Clone failed: {e:#}"),
            Ok(Err(e)) => anyhow::bail!("Clone task failed: {e}"),
            Err(_) => {
                let _ = std::fs::remove_dir_all(&repo_dir);
                anyhow::bail!(
                    "Clone timed out after {}s",
                    state.config.clone_timeout_secs
                );
            }
        }
    }

    index_repo(state, repo_id).await
}

/// Walk, chunk and index a cloned repo, then swap the new generation in and
/// retire the collections of the one it replaced.
async fn index_repo(state: &AppState, repo_id: Uuid) -> anyhow::Result<()> {
    state.set_status(repo_id, RepoStatus::Indexing);
    state.persist_repos();

    let repo = state
        .find_repo(repo_id)
        .ok_or_else(|| anyhow::anyhow!("Repo not found"))?;

    let repo_dir = state.repo_dir(repo_id);
    let max_file_bytes = state.config.max_file_bytes;
    let chunking = state.config.chunking.clone();
    let (scan, corpus) = tokio::task::spawn_blocking(move || {
        let scan = walk_repo_files(&repo_dir, max_file_bytes);
        let corpus = build_corpus(&scan.files, &chunking);
        (scan, corpus)
    })
    .await?;
    let corpus = corpus?;

    tracing::info!(
        "Indexing {}: {} files, {} chunks",
        repo.name,
        scan.files.len(),
        corpus.len()
    );

    let bundle = state
        .retriever
        .build_index(&corpus, COLLECTION_PREFIX)
        .await?;
    if let Err(e) = state.save_corpus(repo_id, &corpus) {
        // The new generation never went live, so its collection has no owner
        if let Err(cleanup) = bundle.retire(state.store.as_ref()) {
            tracing::warn!("Failed to discard unused collection: {cleanup:#}");
        }
        return Err(e);
    }

    let new_collection = bundle.collection_name.clone();
    let chunk_count = corpus.len();
    let replaced = state.install_index(repo_id, IndexedRepo { corpus, bundle });

    {
        let mut repos = state.repos.write();
        if let Some(r) = repos.iter_mut().find(|r| r.id == repo_id) {
            r.status = RepoStatus::Ready;
            r.indexed_at = Some(Utc::now());
            r.file_count = scan.files.len();
            r.chunk_count = chunk_count;
            r.file_type_counts = scan.file_type_counts;
            r.collection_name = new_collection.clone();
        }
    }
    state.persist_repos();

    // Retire every collection the new generation no longer uses
    let mut stale: Vec<String> = replaced
        .and_then(|old| old.bundle.collection_name.clone())
        .into_iter()
        .chain(repo.collection_name)
        .filter(|name| Some(name) != new_collection.as_ref())
        .collect();
    stale.dedup();
    for name in stale {
        match state.store.delete_collection(&name) {
            Ok(()) => tracing::info!("Retired dense collection {name}"),
            Err(e) => tracing::warn!("Failed to retire collection {name}: {e:#}"),
        }
    }

    tracing::info!("Repo {} ready", repo.name);
    Ok(())
}
