use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where cloned repos, vectors and corpora are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// LLM provider configuration
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    /// Maximum number of repos allowed
    pub max_repos: usize,
    /// Clone timeout in seconds
    pub clone_timeout_secs: u64,
    /// Upper bound on one question: retrieval, all model calls and consensus
    pub query_timeout_secs: u64,
    /// Files larger than this are not indexed
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the LLM API
    pub base_url: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// Models consulted for every question; their answers feed the consensus
    pub answer_models: Vec<String>,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Chunks handed to the models per question
    pub top_n: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks
    pub chunk_overlap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9000".to_string(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            chunking: ChunkingConfig::default(),
            max_repos: 50,
            clone_timeout_secs: 300,
            query_timeout_secs: 180,
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            answer_models: vec!["llama3.2".to_string()],
            api_key: None,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_n: 5 }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 3000,
            chunk_overlap: 200,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("REPO_QA_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("REPO_QA_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(v) = lookup("REPO_QA_MAX_REPOS").and_then(|v| v.parse().ok()) {
            config.max_repos = v;
        }
        if let Some(v) = lookup("REPO_QA_CLONE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.clone_timeout_secs = v;
        }
        if let Some(v) = lookup("REPO_QA_QUERY_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            config.query_timeout_secs = v;
        }
        if let Some(v) = lookup("REPO_QA_MAX_FILE_BYTES").and_then(|v| v.parse().ok()) {
            config.max_file_bytes = v;
        }
        if let Some(v) = lookup("REPO_QA_TOP_N").and_then(|v| v.parse().ok()) {
            config.retrieval.top_n = v;
        }
        if let Some(v) = lookup("REPO_QA_CHUNK_SIZE").and_then(|v| v.parse().ok()) {
            config.chunking.chunk_size = v;
        }
        if let Some(v) = lookup("REPO_QA_CHUNK_OVERLAP").and_then(|v| v.parse().ok()) {
            config.chunking.chunk_overlap = v;
        }

        if let Some(provider) = lookup("LLM_PROVIDER") {
            config.llm.provider = provider;
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            config.llm.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("LLM_EMBEDDING_MODEL") {
            config.llm.embedding_model = model;
        }
        if let Some(models) = lookup("LLM_ANSWER_MODELS") {
            let models: Vec<String> = models
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            if !models.is_empty() {
                config.llm.answer_models = models;
            }
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            config.llm.api_key = Some(key);
        }

        // Overlap must leave room for progress
        if config.chunking.chunk_overlap >= config.chunking.chunk_size {
            config.chunking.chunk_overlap = config.chunking.chunk_size / 10;
        }

        config
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn corpus_dir(&self) -> PathBuf {
        self.data_dir.join("corpora")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("repos.json")
    }
}
