//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::ThreadId;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use repo_qa::llm::chat::ChatModel;
use repo_qa::llm::embeddings::Embedder;
use repo_qa::models::{Chunk, Corpus};
use repo_qa::search::vector::{
    CollectionHandle, LocalVectorStore, VectorMatch, VectorRecord, VectorStore,
};

pub const HASH_DIM: usize = 64;

/// Deterministic bag-of-words embedder: each lowercased word is hashed into
/// one of `HASH_DIM` buckets. Texts sharing words point the same way.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; HASH_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % HASH_DIM;
            v[bucket] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Embedder whose provider is always down.
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding provider unreachable")
    }
}

/// Exact-text lookup; unknown text is an error.
pub struct MapEmbedder(pub HashMap<String, Vec<f32>>);

#[async_trait]
impl Embedder for MapEmbedder {
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| {
                self.0
                    .get(t)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("no vector for {t:?}"))
            })
            .collect()
    }
}

/// Vector store where every call fails.
pub struct UnreachableStore;

impl VectorStore for UnreachableStore {
    fn create_collection(&self, name: &str) -> Result<CollectionHandle> {
        anyhow::bail!("store unreachable creating {name}")
    }

    fn open_collection(&self, name: &str) -> Result<CollectionHandle> {
        anyhow::bail!("store unreachable opening {name}")
    }

    fn upsert(&self, _handle: &CollectionHandle, _records: Vec<VectorRecord>) -> Result<()> {
        anyhow::bail!("store unreachable")
    }

    fn query(&self, _handle: &CollectionHandle, _vector: &[f32], _k: usize) -> Result<Vec<VectorMatch>> {
        anyhow::bail!("store unreachable")
    }

    fn delete_collection(&self, _name: &str) -> Result<()> {
        anyhow::bail!("store unreachable")
    }
}

/// In-memory store that can be taken offline after indexing.
pub struct FlakyStore {
    pub inner: LocalVectorStore,
    pub down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: LocalVectorStore::in_memory(),
            down: AtomicBool::new(false),
        }
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            anyhow::bail!("store went away");
        }
        Ok(())
    }
}

impl VectorStore for FlakyStore {
    fn create_collection(&self, name: &str) -> Result<CollectionHandle> {
        self.check()?;
        self.inner.create_collection(name)
    }

    fn open_collection(&self, name: &str) -> Result<CollectionHandle> {
        self.check()?;
        self.inner.open_collection(name)
    }

    fn upsert(&self, handle: &CollectionHandle, records: Vec<VectorRecord>) -> Result<()> {
        self.check()?;
        self.inner.upsert(handle, records)
    }

    fn query(&self, handle: &CollectionHandle, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        self.check()?;
        self.inner.query(handle, vector, k)
    }

    fn delete_collection(&self, name: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_collection(name)
    }
}

/// In-memory store noting which thread each upsert ran on.
pub struct ThreadRecordingStore {
    pub inner: LocalVectorStore,
    pub upsert_threads: Mutex<Vec<ThreadId>>,
}

impl ThreadRecordingStore {
    pub fn new() -> Self {
        Self {
            inner: LocalVectorStore::in_memory(),
            upsert_threads: Mutex::new(Vec::new()),
        }
    }
}

impl VectorStore for ThreadRecordingStore {
    fn create_collection(&self, name: &str) -> Result<CollectionHandle> {
        self.inner.create_collection(name)
    }

    fn open_collection(&self, name: &str) -> Result<CollectionHandle> {
        self.inner.open_collection(name)
    }

    fn upsert(&self, handle: &CollectionHandle, records: Vec<VectorRecord>) -> Result<()> {
        self.upsert_threads.lock().push(std::thread::current().id());
        self.inner.upsert(handle, records)
    }

    fn query(&self, handle: &CollectionHandle, vector: &[f32], k: usize) -> Result<Vec<VectorMatch>> {
        self.inner.query(handle, vector, k)
    }

    fn delete_collection(&self, name: &str) -> Result<()> {
        self.inner.delete_collection(name)
    }
}

/// Answer model returning a fixed reply, an error, or nothing for a while.
pub struct CannedModel {
    pub id: String,
    pub reply: Option<String>,
    pub delay: Option<Duration>,
}

impl CannedModel {
    pub fn answering(id: &str, reply: &str) -> Self {
        Self {
            id: id.to_string(),
            reply: Some(reply.to_string()),
            delay: None,
        }
    }

    pub fn failing(id: &str) -> Self {
        Self {
            id: id.to_string(),
            reply: None,
            delay: None,
        }
    }

    pub fn slow(id: &str, delay: Duration) -> Self {
        Self {
            id: id.to_string(),
            reply: Some("eventually".to_string()),
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl ChatModel for CannedModel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply
            .clone()
            .ok_or_else(|| anyhow::anyhow!("rate limited"))
    }
}

/// Chunks of a small web service, one per file.
pub fn sample_corpus(generation: &str) -> Corpus {
    let files = [
        (
            "src/main.rs",
            "use axum::Router;\nfn main() {\n    let app = Router::new();\n    axum::serve(app).await;\n}",
        ),
        (
            "src/handlers.rs",
            "pub async fn health_check() -> &'static str {\n    \"OK\"\n}\n\npub async fn create_user(Json(body): Json<CreateUser>) -> impl IntoResponse {\n    StatusCode::CREATED\n}",
        ),
        (
            "src/db.rs",
            "pub struct Database {\n    pool: PgPool,\n}\n\nimpl Database {\n    pub async fn connect(url: &str) -> Result<Self> {\n        let pool = PgPool::connect(url).await?;\n        Ok(Self { pool })\n    }\n}",
        ),
        (
            "src/models.rs",
            "#[derive(Debug, Serialize, Deserialize)]\npub struct User {\n    pub id: i64,\n    pub name: String,\n    pub email: String,\n}",
        ),
        (
            "README.md",
            "# User Service\n\nA REST API for managing users.\n\n## Endpoints\n- GET /health\n- POST /users",
        ),
        (
            "docs/deploy.md",
            "Deploy with docker compose. The database migrations run on startup.",
        ),
    ];
    corpus_from(generation, &files)
}

pub fn corpus_from(generation: &str, files: &[(&str, &str)]) -> Corpus {
    let chunks = files
        .iter()
        .enumerate()
        .map(|(i, (path, text))| {
            let file_id = format!("{generation}-file{i}");
            Chunk {
                chunk_id: format!("{file_id}_chunk_0"),
                file_id,
                source_path: path.to_string(),
                text: text.to_string(),
            }
        })
        .collect();
    Corpus::new(chunks).unwrap()
}
