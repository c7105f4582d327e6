use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::config::Config;
use crate::llm::chat::{ChatModel, HttpChatModel};
use crate::llm::embeddings::{shared_embedder, Embedder};
use crate::models::{Corpus, Repo, RepoStatus};
use crate::search::hybrid::HybridRetriever;
use crate::search::index::IndexBundle;
use crate::search::vector::{LocalVectorStore, VectorStore};

/// Maximum questions answered at once; each one fans out to every model.
const MAX_CONCURRENT_ASKS: usize = 3;
const MAX_CONCURRENT_CLONES: usize = 2;

/// A repository's live corpus and the indices built over it.
pub struct IndexedRepo {
    pub corpus: Corpus,
    pub bundle: IndexBundle,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub repos: Arc<RwLock<Vec<Repo>>>,
    pub indexes: Arc<RwLock<HashMap<Uuid, Arc<IndexedRepo>>>>,
    pub retriever: Arc<HybridRetriever>,
    pub store: Arc<LocalVectorStore>,
    pub models: Arc<Vec<Arc<dyn ChatModel>>>,
    pub clone_semaphore: Arc<tokio::sync::Semaphore>,
    pub ask_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    /// State backed by the configured HTTP embedder and answer models.
    pub async fn new(config: Config) -> Result<Self> {
        let embedder = shared_embedder(&config.llm).await?;
        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(config.query_timeout_secs))
            .build()?;
        let models = HttpChatModel::from_config(&http_client, &config.llm);
        Self::with_components(config, embedder, models)
    }

    /// State with explicit collaborators. Loads persisted repos and reattaches
    /// the indices of every ready one.
    pub fn with_components(
        config: Config,
        embedder: Arc<dyn Embedder>,
        models: Vec<Arc<dyn ChatModel>>,
    ) -> Result<Self> {
        // Ensure data directories exist
        std::fs::create_dir_all(config.repos_dir())?;
        std::fs::create_dir_all(config.vector_dir())?;
        std::fs::create_dir_all(config.corpus_dir())?;

        // Load persisted repos
        let repos: Vec<Repo> = if config.db_path().exists() {
            let data = std::fs::read_to_string(config.db_path())?;
            serde_json::from_str(&data).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable {}: {e}", config.db_path().display());
                Vec::new()
            })
        } else {
            Vec::new()
        };

        let store = Arc::new(LocalVectorStore::open_or_create(&config.vector_dir())?);
        let retriever = Arc::new(HybridRetriever::new(embedder, store.clone()));

        let state = Self {
            config,
            repos: Arc::new(RwLock::new(repos)),
            indexes: Arc::new(RwLock::new(HashMap::new())),
            retriever,
            store,
            models: Arc::new(models),
            clone_semaphore: Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_CLONES)),
            ask_semaphore: Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_ASKS)),
        };
        state.restore_indexes();
        Ok(state)
    }

    /// Reattach ready repos; repos caught mid-clone or mid-index by a restart
    /// are marked failed.
    fn restore_indexes(&self) {
        let snapshot = self.repos.read().clone();
        let mut changed = false;

        for repo in snapshot {
            match repo.status {
                RepoStatus::Ready => {
                    let restored = self.load_corpus(repo.id).and_then(|corpus| {
                        let bundle = self
                            .retriever
                            .reattach(&corpus, repo.collection_name.as_deref())?;
                        Ok(IndexedRepo { corpus, bundle })
                    });
                    match restored {
                        Ok(indexed) => {
                            tracing::info!(
                                "Restored {} ({} chunks, dense: {})",
                                repo.name,
                                indexed.corpus.len(),
                                indexed.bundle.has_dense()
                            );
                            self.indexes.write().insert(repo.id, Arc::new(indexed));
                        }
                        Err(e) => {
                            tracing::warn!("Could not restore {}: {e:#}", repo.name);
                            self.set_status(repo.id, RepoStatus::Error(format!("{e:#}")));
                            changed = true;
                        }
                    }
                }
                RepoStatus::Cloning | RepoStatus::Indexing => {
                    self.set_status(
                        repo.id,
                        RepoStatus::Error("Interrupted by restart".to_string()),
                    );
                    changed = true;
                }
                RepoStatus::Error(_) => {}
            }
        }

        if changed {
            self.persist_repos();
        }
        self.sweep_orphan_collections();
    }

    /// Delete persisted collections that no repo record points at, e.g. left
    /// by a build that failed before its generation went live.
    fn sweep_orphan_collections(&self) {
        let referenced: HashSet<String> = self
            .repos
            .read()
            .iter()
            .filter_map(|r| r.collection_name.clone())
            .collect();
        for name in self.store.persisted_collection_names() {
            if referenced.contains(&name) {
                continue;
            }
            match self.store.delete_collection(&name) {
                Ok(()) => tracing::info!("Removed orphaned dense collection {name}"),
                Err(e) => tracing::warn!("Failed to remove orphaned collection {name}: {e:#}"),
            }
        }
    }

    pub fn find_repo(&self, id: Uuid) -> Option<Repo> {
        self.repos.read().iter().find(|r| r.id == id).cloned()
    }

    pub fn set_status(&self, id: Uuid, status: RepoStatus) {
        if let Some(repo) = self.repos.write().iter_mut().find(|r| r.id == id) {
            repo.status = status;
        }
    }

    pub fn indexed(&self, id: Uuid) -> Option<Arc<IndexedRepo>> {
        self.indexes.read().get(&id).cloned()
    }

    /// Swap in a new generation and return the one it replaced. Queries that
    /// already hold the old `Arc` finish against it.
    pub fn install_index(&self, id: Uuid, indexed: IndexedRepo) -> Option<Arc<IndexedRepo>> {
        self.indexes.write().insert(id, Arc::new(indexed))
    }

    pub fn remove_index(&self, id: Uuid) -> Option<Arc<IndexedRepo>> {
        self.indexes.write().remove(&id)
    }

    pub fn repo_dir(&self, id: Uuid) -> PathBuf {
        self.config.repos_dir().join(id.to_string())
    }

    fn corpus_path(&self, id: Uuid) -> PathBuf {
        self.config.corpus_dir().join(format!("{id}.json"))
    }

    pub fn save_corpus(&self, id: Uuid, corpus: &Corpus) -> Result<()> {
        let path = self.corpus_path(id);
        let tmp_path = path.with_extension("json.tmp");
        let data = serde_json::to_vec(corpus)?;
        std::fs::write(&tmp_path, data)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn load_corpus(&self, id: Uuid) -> Result<Corpus> {
        let path = self.corpus_path(id);
        let data = std::fs::read(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn remove_corpus(&self, id: Uuid) {
        let _ = std::fs::remove_file(self.corpus_path(id));
    }

    /// Persist repos list to disk (atomic write via temp file + rename).
    pub fn persist_repos(&self) {
        let repos = self.repos.read();
        match serde_json::to_string_pretty(&*repos) {
            Ok(data) => {
                let db_path = self.config.db_path();
                let tmp_path = db_path.with_extension("json.tmp");
                if let Err(e) =
                    std::fs::write(&tmp_path, &data).and_then(|_| std::fs::rename(&tmp_path, &db_path))
                {
                    tracing::error!("Failed to persist repos: {e}");
                }
            }
            Err(e) => tracing::error!("Failed to serialize repos: {e}"),
        }
    }
}
