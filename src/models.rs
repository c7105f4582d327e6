use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A contiguous slice of one source file, the unit of indexing and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    /// Shared by every chunk cut from the same file.
    pub file_id: String,
    /// Repository-relative path.
    pub source_path: String,
    pub text: String,
}

/// The ordered chunks of one repository snapshot.
///
/// Position in the corpus is the address every index uses to correlate
/// scores, so the order never changes after construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Chunk>", into = "Vec<Chunk>")]
pub struct Corpus {
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
}

impl Corpus {
    /// Fails if two chunks share a `chunk_id`.
    pub fn new(chunks: Vec<Chunk>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            if positions.insert(chunk.chunk_id.clone(), i).is_some() {
                anyhow::bail!("Duplicate chunk id in corpus: {}", chunk.chunk_id);
            }
        }
        Ok(Self { chunks, positions })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn get(&self, position: usize) -> Option<&Chunk> {
        self.chunks.get(position)
    }

    /// Corpus position of the chunk with this id.
    pub fn position(&self, chunk_id: &str) -> Option<usize> {
        self.positions.get(chunk_id).copied()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().map(|c| c.text.as_str())
    }
}

impl TryFrom<Vec<Chunk>> for Corpus {
    type Error = anyhow::Error;

    fn try_from(chunks: Vec<Chunk>) -> Result<Self> {
        Self::new(chunks)
    }
}

impl From<Corpus> for Vec<Chunk> {
    fn from(corpus: Corpus) -> Self {
        corpus.chunks
    }
}

/// A retrieved chunk with the per-signal scores that ranked it.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub position: usize,
    pub chunk: Chunk,
    pub lexical_score: f32,
    pub sparse_score: f32,
    pub dense_score: f32,
    pub combined_score: f32,
}

/// What one model produced for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "text", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Answered(String),
    Failed(String),
}

/// One model's answer, tagged with the model identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateAnswer {
    pub model: String,
    pub outcome: AnswerOutcome,
}

impl CandidateAnswer {
    pub fn answered(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            outcome: AnswerOutcome::Answered(text.into()),
        }
    }

    pub fn failed(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            outcome: AnswerOutcome::Failed(reason.into()),
        }
    }

    /// The answer text, or `None` for a failed call.
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            AnswerOutcome::Answered(text) => Some(text),
            AnswerOutcome::Failed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelScore {
    pub model: String,
    pub avg_similarity: f64,
}

/// The chosen answer plus every valid candidate's agreement score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub text: String,
    /// Model whose answer was chosen; `None` when no model answered.
    pub winner: Option<String>,
    /// Descending by `avg_similarity`, ties in input order.
    pub scores: Vec<ModelScore>,
    /// Set when similarity could not be computed and the first valid answer was used.
    #[serde(default)]
    pub fallback: bool,
}

/// A tracked repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: Uuid,
    pub url: String,
    pub name: String,
    pub status: RepoStatus,
    pub added_at: DateTime<Utc>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub file_count: usize,
    pub chunk_count: usize,
    /// File extension -> number of indexed files.
    #[serde(default)]
    pub file_type_counts: BTreeMap<String, usize>,
    /// Dense collection of the live index generation.
    #[serde(default)]
    pub collection_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Cloning,
    Indexing,
    Ready,
    Error(String),
}

/// Add-repo request
#[derive(Debug, Clone, Deserialize)]
pub struct AddRepoRequest {
    pub url: String,
}

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub repo_id: Uuid,
    pub query: String,
    pub top_n: Option<usize>,
}

/// Search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<ScoredChunk>,
}

/// Ask request
#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub repo_id: Uuid,
    pub question: String,
    pub history: Option<Vec<ChatMessage>>,
    pub top_n: Option<usize>,
}

/// A single conversation turn (user or assistant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Ask response
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub winner: Option<String>,
    pub scores: Vec<ModelScore>,
    pub fallback: bool,
    pub candidates: Vec<CandidateAnswer>,
    pub sources: Vec<String>,
}
