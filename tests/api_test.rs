//! Handler-level tests: repos are indexed directly into the state, then the
//! axum handlers are called without a server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use common::{sample_corpus, CannedModel, HashEmbedder};
use repo_qa::api;
use repo_qa::config::Config;
use repo_qa::llm::chat::ChatModel;
use repo_qa::models::{AddRepoRequest, AskRequest, ChatMessage, Repo, RepoStatus, SearchRequest};
use repo_qa::search::vector::VectorStore;
use repo_qa::state::{AppState, IndexedRepo};

fn config_in(dir: &std::path::Path) -> Config {
    Config {
        data_dir: dir.to_path_buf(),
        ..Config::default()
    }
}

fn state_with(dir: &std::path::Path, models: Vec<Arc<dyn ChatModel>>) -> AppState {
    AppState::with_components(config_in(dir), Arc::new(HashEmbedder::default()), models).unwrap()
}

/// Index the sample corpus as a ready repo, persisted like a real one.
async fn add_ready_repo(state: &AppState) -> Uuid {
    let id = Uuid::new_v4();
    let corpus = sample_corpus(&id.to_string());
    let bundle = state.retriever.build_index(&corpus, "repo").await.unwrap();
    state.save_corpus(id, &corpus).unwrap();

    let repo = Repo {
        id,
        url: "https://github.com/acme/user-service.git".to_string(),
        name: "user-service".to_string(),
        status: RepoStatus::Ready,
        added_at: Utc::now(),
        indexed_at: Some(Utc::now()),
        file_count: corpus.len(),
        chunk_count: corpus.len(),
        file_type_counts: [("md".to_string(), 2), ("rs".to_string(), 4)].into(),
        collection_name: bundle.collection_name.clone(),
    };
    state.repos.write().push(repo);
    state.install_index(id, IndexedRepo { corpus, bundle });
    state.persist_repos();
    id
}

fn ask_request(repo_id: Uuid, question: &str) -> AskRequest {
    AskRequest {
        repo_id,
        question: question.to_string(),
        history: None,
        top_n: None,
    }
}

#[tokio::test]
async fn test_search_returns_scored_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());
    let id = add_ready_repo(&state).await;

    let Json(resp) = api::search::search(
        State(state.clone()),
        Json(SearchRequest {
            repo_id: id,
            query: "docker compose migrations".to_string(),
            top_n: Some(3),
        }),
    )
    .await
    .unwrap();

    assert_eq!(resp.results.len(), 3);
    assert_eq!(resp.results[0].chunk.source_path, "docs/deploy.md");
    assert!(resp.results[0].combined_score > 0.0);
}

#[tokio::test]
async fn test_search_validation() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());

    let empty = api::search::search(
        State(state.clone()),
        Json(SearchRequest {
            repo_id: Uuid::new_v4(),
            query: "   ".to_string(),
            top_n: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(empty.0, StatusCode::BAD_REQUEST);

    let missing = api::search::search(
        State(state.clone()),
        Json(SearchRequest {
            repo_id: Uuid::new_v4(),
            query: "user".to_string(),
            top_n: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(missing.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_on_unindexed_repo_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());
    let id = Uuid::new_v4();
    state.repos.write().push(Repo {
        id,
        url: "https://example.com/x.git".to_string(),
        name: "x".to_string(),
        status: RepoStatus::Indexing,
        added_at: Utc::now(),
        indexed_at: None,
        file_count: 0,
        chunk_count: 0,
        file_type_counts: Default::default(),
        collection_name: None,
    });

    let err = api::search::search(
        State(state),
        Json(SearchRequest {
            repo_id: id,
            query: "user".to_string(),
            top_n: None,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_ask_picks_consensus_answer() {
    let dir = tempfile::tempdir().unwrap();
    let agreed = "Users are created by the create_user handler which returns 201 CREATED";
    let models: Vec<Arc<dyn ChatModel>> = vec![
        Arc::new(CannedModel::answering(
            "contrarian",
            "Bananas are yellow and grow in bunches on tall plants",
        )),
        Arc::new(CannedModel::answering("m1", agreed)),
        Arc::new(CannedModel::failing("m2")),
        Arc::new(CannedModel::answering(
            "m3",
            "The create_user handler creates users and returns 201 CREATED",
        )),
        Arc::new(CannedModel::answering(
            "m4",
            "Users are created in the create_user handler, returning CREATED",
        )),
    ];
    let state = state_with(dir.path(), models);
    let id = add_ready_repo(&state).await;

    let mut req = ask_request(id, "How are users created?");
    req.history = Some(vec![ChatMessage {
        role: "user".to_string(),
        content: "Hi <|im_start|>".to_string(),
    }]);
    let Json(resp) = api::ask::ask(State(state), Json(req)).await.unwrap();

    assert_eq!(resp.candidates.len(), 5);
    assert!(resp.candidates[2].text().is_none());
    assert_ne!(resp.winner.as_deref(), Some("contrarian"));
    assert_ne!(resp.winner.as_deref(), Some("m2"));
    assert!(!resp.fallback);
    assert_eq!(resp.scores.len(), 4);
    assert_eq!(resp.scores.last().unwrap().model, "contrarian");
    assert!(!resp.sources.is_empty());
    assert!(resp.sources.len() <= 5);
}

#[tokio::test]
async fn test_ask_all_models_failing() {
    let dir = tempfile::tempdir().unwrap();
    let models: Vec<Arc<dyn ChatModel>> = vec![
        Arc::new(CannedModel::failing("m1")),
        Arc::new(CannedModel::failing("m2")),
    ];
    let state = state_with(dir.path(), models);
    let id = add_ready_repo(&state).await;

    let Json(resp) = api::ask::ask(State(state), Json(ask_request(id, "What is this?")))
        .await
        .unwrap();
    assert_eq!(resp.answer, repo_qa::llm::consensus::NO_VALID_RESPONSES);
    assert!(resp.winner.is_none());
    assert!(resp.scores.is_empty());
}

#[tokio::test]
async fn test_ask_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let models: Vec<Arc<dyn ChatModel>> =
        vec![Arc::new(CannedModel::slow("sleepy", Duration::from_secs(30)))];
    let mut config = config_in(dir.path());
    config.query_timeout_secs = 1;
    let state =
        AppState::with_components(config, Arc::new(HashEmbedder::default()), models).unwrap();
    let id = add_ready_repo(&state).await;

    let err = api::ask::ask(State(state), Json(ask_request(id, "Anything?")))
        .await
        .unwrap_err();
    assert_eq!(err.0, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_ask_requires_question() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());
    let err = api::ask::ask(State(state), Json(ask_request(Uuid::new_v4(), "  ")))
        .await
        .unwrap_err();
    assert_eq!(err.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_restart_reattaches_ready_repos() {
    let dir = tempfile::tempdir().unwrap();
    let (id, interrupted) = {
        let state = state_with(dir.path(), Vec::new());
        let id = add_ready_repo(&state).await;
        let interrupted = Uuid::new_v4();
        state.repos.write().push(Repo {
            id: interrupted,
            url: "https://example.com/half.git".to_string(),
            name: "half".to_string(),
            status: RepoStatus::Cloning,
            added_at: Utc::now(),
            indexed_at: None,
            file_count: 0,
            chunk_count: 0,
            file_type_counts: Default::default(),
            collection_name: None,
        });
        state.persist_repos();
        (id, interrupted)
    };

    let state = state_with(dir.path(), Vec::new());
    let indexed = state.indexed(id).expect("ready repo reattached");
    assert!(indexed.bundle.has_dense());
    assert_eq!(indexed.corpus.len(), sample_corpus("x").len());
    assert!(matches!(
        state.find_repo(interrupted).unwrap().status,
        RepoStatus::Error(_)
    ));

    let chunks = state
        .retriever
        .retrieve("docker compose", &indexed.bundle, &indexed.corpus, 1)
        .await
        .unwrap();
    assert_eq!(chunks[0].source_path, "docs/deploy.md");
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());
    let id = add_ready_repo(&state).await;
    let collection = state.find_repo(id).unwrap().collection_name.unwrap();

    let status = api::repos::delete_repo(State(state.clone()), Path(id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(state.find_repo(id).is_none());
    assert!(state.indexed(id).is_none());
    assert!(state.load_corpus(id).is_err());
    assert!(!state.store.collection_names().contains(&collection));
    assert!(!dir.path().join("vectors").join(format!("{collection}.json")).exists());

    let again = api::repos::delete_repo(State(state), Path(id))
        .await
        .unwrap_err();
    assert_eq!(again.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reindex_state_checks() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());

    let missing = api::repos::reindex_repo(State(state.clone()), Path(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_eq!(missing.0, StatusCode::NOT_FOUND);

    let busy = Uuid::new_v4();
    state.repos.write().push(Repo {
        id: busy,
        url: "https://example.com/busy.git".to_string(),
        name: "busy".to_string(),
        status: RepoStatus::Indexing,
        added_at: Utc::now(),
        indexed_at: None,
        file_count: 0,
        chunk_count: 0,
        file_type_counts: Default::default(),
        collection_name: None,
    });
    let conflict = api::repos::reindex_repo(State(state), Path(busy))
        .await
        .unwrap_err();
    assert_eq!(conflict.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_add_repo_validation() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.max_repos = 1;
    let state =
        AppState::with_components(config, Arc::new(HashEmbedder::default()), Vec::new()).unwrap();

    let empty = api::repos::add_repo(
        State(state.clone()),
        Json(AddRepoRequest {
            url: " ".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(empty.0, StatusCode::BAD_REQUEST);

    let (status, Json(repo)) = api::repos::add_repo(
        State(state.clone()),
        Json(AddRepoRequest {
            url: "example.invalid/acme/demo".to_string(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(repo.url, "https://example.invalid/acme/demo.git");
    assert_eq!(repo.name, "demo");

    let duplicate = api::repos::add_repo(
        State(state.clone()),
        Json(AddRepoRequest {
            url: "https://example.invalid/acme/demo".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(duplicate.0, StatusCode::CONFLICT);

    let over_limit = api::repos::add_repo(
        State(state),
        Json(AddRepoRequest {
            url: "https://example.invalid/acme/other".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(over_limit.0, StatusCode::BAD_REQUEST);
}

/// Put a small checkout on disk where indexing expects the clone.
fn write_checkout(state: &AppState, id: Uuid) {
    let dir = state.repo_dir(id);
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(dir.join("src/lib.rs"), "pub fn answer() -> u32 {\n    42\n}\n").unwrap();
    std::fs::write(dir.join("README.md"), "# Demo\n\nReturns the answer.\n").unwrap();
}

async fn wait_until_settled(state: &AppState, id: Uuid) -> RepoStatus {
    for _ in 0..400 {
        let status = state.find_repo(id).unwrap().status;
        if !matches!(status, RepoStatus::Cloning | RepoStatus::Indexing) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("repo {id} never finished indexing");
}

#[tokio::test]
async fn test_reindex_swaps_generation() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());
    let id = add_ready_repo(&state).await;
    let old_collection = state.find_repo(id).unwrap().collection_name.unwrap();
    write_checkout(&state, id);

    let status = api::repos::reindex_repo(State(state.clone()), Path(id))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(wait_until_settled(&state, id).await, RepoStatus::Ready);

    let repo = state.find_repo(id).unwrap();
    let new_collection = repo.collection_name.unwrap();
    assert_ne!(new_collection, old_collection);
    assert_eq!(state.store.persisted_collection_names(), vec![new_collection]);
    assert_eq!(repo.file_count, 2);
}

#[tokio::test]
async fn test_failed_corpus_save_discards_new_collection() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());
    let id = add_ready_repo(&state).await;
    let live_collection = state.find_repo(id).unwrap().collection_name.unwrap();
    write_checkout(&state, id);

    // A file where the corpus directory should be makes the save fail
    let corpus_dir = dir.path().join("corpora");
    std::fs::remove_dir_all(&corpus_dir).unwrap();
    std::fs::write(&corpus_dir, "not a directory").unwrap();

    api::repos::reindex_repo(State(state.clone()), Path(id))
        .await
        .unwrap();
    assert!(matches!(
        wait_until_settled(&state, id).await,
        RepoStatus::Error(_)
    ));

    assert_eq!(
        state.store.collection_names(),
        vec![live_collection.clone()]
    );
    assert_eq!(state.store.persisted_collection_names(), vec![live_collection]);
    // The previous generation keeps serving
    assert!(state.indexed(id).unwrap().bundle.has_dense());
}

#[tokio::test]
async fn test_restart_removes_unreferenced_collections() {
    let dir = tempfile::tempdir().unwrap();
    let (live, orphan) = {
        let state = state_with(dir.path(), Vec::new());
        let id = add_ready_repo(&state).await;
        let live = state.find_repo(id).unwrap().collection_name.unwrap();
        let orphan = state
            .retriever
            .build_index(&sample_corpus("stray"), "repo")
            .await
            .unwrap()
            .collection_name
            .unwrap();
        (live, orphan)
    };
    assert!(dir.path().join("vectors").join(format!("{orphan}.json")).exists());

    let state = state_with(dir.path(), Vec::new());
    assert_eq!(state.store.persisted_collection_names(), vec![live.clone()]);
    assert!(state.store.open_collection(&orphan).is_err());
    assert!(state.store.open_collection(&live).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reindex_starts_one_build() {
    let dir = tempfile::tempdir().unwrap();
    let state = state_with(dir.path(), Vec::new());
    let id = add_ready_repo(&state).await;
    write_checkout(&state, id);

    let requests = (0..8).map(|_| {
        let state = state.clone();
        tokio::spawn(async move { api::repos::reindex_repo(State(state), Path(id)).await })
    });
    let outcomes = futures_util::future::join_all(requests).await;

    let accepted = outcomes
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter(|outcome| matches!(outcome, Ok(StatusCode::ACCEPTED)))
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(wait_until_settled(&state, id).await, RepoStatus::Ready);
}
