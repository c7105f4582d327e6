use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::llm::embeddings::Embedder;
use crate::models::{Chunk, Corpus, ScoredChunk};
use crate::search::bm25::LexicalIndex;
use crate::search::index::IndexBundle;
use crate::search::tfidf::SparseIndex;
use crate::search::vector::{ChunkMetadata, CollectionHandle, VectorRecord, VectorStore};

pub const LEXICAL_WEIGHT: f32 = 0.34;
pub const SPARSE_WEIGHT: f32 = 0.33;
pub const DENSE_WEIGHT: f32 = 0.33;

/// Per-signal scores for one query, each indexed by corpus position.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalScores {
    pub lexical: Vec<f32>,
    pub sparse: Vec<f32>,
    pub dense: Vec<f32>,
    pub combined: Vec<f32>,
}

/// Builds the three indices for a corpus and answers queries against them.
///
/// Index pipeline:
/// 1. Lexical: tokenized chunks into a tantivy BM25 index.
/// 2. Sparse: TF-IDF vectors over the same tokens.
/// 3. Dense: one embedding per chunk, upserted into a freshly named collection.
///
/// Query pipeline: score every chunk with each signal, combine with fixed
/// weights (0.34 / 0.33 / 0.33), keep the top N. A failing embedder or
/// vector store only zeroes the dense signal.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl HybridRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    /// Build all indices for `corpus`. The dense collection is named
    /// `{collection_prefix}-{uuid}` so no two generations share one.
    pub async fn build_index(&self, corpus: &Corpus, collection_prefix: &str) -> Result<IndexBundle> {
        if corpus.is_empty() {
            tracing::info!("Corpus is empty, nothing to index");
            return Ok(IndexBundle::empty());
        }

        let owned = corpus.clone();
        let (lexical, sparse) = tokio::task::spawn_blocking(move || -> Result<_> {
            let lexical = LexicalIndex::build(&owned)?;
            Ok((lexical, SparseIndex::fit(&owned)))
        })
        .await
        .context("Lexical index task failed")??;
        tracing::info!(
            "Lexical + sparse indices built: {} chunks, {} terms",
            corpus.len(),
            sparse.vocabulary_size()
        );

        let name = format!("{collection_prefix}-{}", Uuid::new_v4());
        let dense = match self.build_dense(corpus, &name).await {
            Ok(handle) => {
                tracing::info!("Dense collection {name} populated");
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(
                    "Dense index unavailable, continuing with lexical + sparse only: {e:#}"
                );
                if let Err(e) = self.store.delete_collection(&name) {
                    tracing::debug!("Cleanup of {name} failed: {e:#}");
                }
                None
            }
        };
        let collection_name = dense.as_ref().map(|h| h.name().to_string());

        Ok(IndexBundle::new(
            lexical,
            sparse,
            dense,
            collection_name,
            corpus.len(),
        ))
    }

    async fn build_dense(&self, corpus: &Corpus, name: &str) -> Result<CollectionHandle> {
        let texts: Vec<String> = corpus.texts().map(str::to_string).collect();
        let embeddings = self
            .embedder
            .embed_many(&texts)
            .await
            .context("Failed to embed chunks")?;
        if embeddings.len() != corpus.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                corpus.len()
            );
        }

        let records: Vec<VectorRecord> = corpus
            .chunks()
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorRecord {
                id: chunk.chunk_id.clone(),
                embedding,
                metadata: ChunkMetadata {
                    source_path: chunk.source_path.clone(),
                    file_id: chunk.file_id.clone(),
                    chunk_id: chunk.chunk_id.clone(),
                },
            })
            .collect();

        // Upsert and persistence are synchronous disk work
        let store = self.store.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || -> Result<CollectionHandle> {
            let handle = store.create_collection(&name)?;
            store.upsert(&handle, records)?;
            Ok(handle)
        })
        .await
        .context("Vector upsert task failed")?
    }

    /// Rebuild lexical + sparse from a persisted corpus and reopen its dense
    /// collection by name. A collection that cannot be reopened leaves the
    /// bundle without a dense signal.
    pub fn reattach(&self, corpus: &Corpus, collection_name: Option<&str>) -> Result<IndexBundle> {
        if corpus.is_empty() {
            return Ok(IndexBundle::empty());
        }

        let lexical = LexicalIndex::build(corpus)?;
        let sparse = SparseIndex::fit(corpus);
        let dense = collection_name.and_then(|name| match self.store.open_collection(name) {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!("Could not reopen dense collection {name}: {e:#}");
                None
            }
        });

        Ok(IndexBundle::new(
            lexical,
            sparse,
            dense,
            collection_name.map(str::to_string),
            corpus.len(),
        ))
    }

    /// The `top_n` most relevant chunks, highest combined score first.
    pub async fn retrieve(
        &self,
        query: &str,
        bundle: &IndexBundle,
        corpus: &Corpus,
        top_n: usize,
    ) -> Result<Vec<Chunk>> {
        Ok(self
            .retrieve_scored(query, bundle, corpus, top_n)
            .await?
            .into_iter()
            .map(|s| s.chunk)
            .collect())
    }

    /// Like [`retrieve`](Self::retrieve), keeping each chunk's scores.
    pub async fn retrieve_scored(
        &self,
        query: &str,
        bundle: &IndexBundle,
        corpus: &Corpus,
        top_n: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if corpus.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }

        let scores = self.score(query, bundle, corpus, top_n).await?;
        let selected = select_top_n(&scores.combined, top_n);
        tracing::debug!(
            "Selected {} of {} chunks (dense signal: {})",
            selected.len(),
            corpus.len(),
            bundle.has_dense()
        );

        selected
            .into_iter()
            .map(|position| {
                let chunk = corpus
                    .get(position)
                    .cloned()
                    .context("Selected position outside corpus")?;
                Ok(ScoredChunk {
                    position,
                    chunk,
                    lexical_score: scores.lexical[position],
                    sparse_score: scores.sparse[position],
                    dense_score: scores.dense[position],
                    combined_score: scores.combined[position],
                })
            })
            .collect()
    }

    /// Score every chunk of `corpus` with each signal and combine them.
    ///
    /// `top_n` bounds the nearest-neighbour query; chunks outside the dense
    /// top `min(top_n, |corpus|)` get a dense score of 0.
    pub async fn score(
        &self,
        query: &str,
        bundle: &IndexBundle,
        corpus: &Corpus,
        top_n: usize,
    ) -> Result<SignalScores> {
        let n = corpus.len();
        if bundle.len() != n {
            anyhow::bail!(
                "Index bundle covers {} chunks but corpus has {n}",
                bundle.len()
            );
        }

        let lexical = match &bundle.lexical {
            Some(index) => index.scores(query)?,
            None => vec![0.0; n],
        };

        let sparse = match &bundle.sparse {
            Some(index) => index.scores(query),
            None if n > 0 => SparseIndex::fit(corpus).scores(query),
            None => Vec::new(),
        };

        let dense = self.dense_scores(query, bundle, corpus, top_n).await;

        let combined = (0..n)
            .map(|i| LEXICAL_WEIGHT * lexical[i] + SPARSE_WEIGHT * sparse[i] + DENSE_WEIGHT * dense[i])
            .collect();

        Ok(SignalScores {
            lexical,
            sparse,
            dense,
            combined,
        })
    }

    async fn dense_scores(
        &self,
        query: &str,
        bundle: &IndexBundle,
        corpus: &Corpus,
        top_n: usize,
    ) -> Vec<f32> {
        let mut scores = vec![0.0f32; corpus.len()];
        let Some(handle) = &bundle.dense else {
            return scores;
        };
        let k = top_n.min(corpus.len());
        if k == 0 {
            return scores;
        }

        let query_embedding = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Dense signal skipped, query embedding failed: {e:#}");
                return scores;
            }
        };

        let matches = match self.store.query(handle, &query_embedding, k) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Dense signal skipped, vector store query failed: {e:#}");
                return scores;
            }
        };

        for m in matches {
            match corpus.position(&m.id) {
                Some(position) => scores[position] = 1.0 - m.distance,
                None => tracing::debug!("Dense match {} is not in the current corpus", m.id),
            }
        }
        scores
    }
}

/// Positions of the `top_n` highest scores, descending; equal scores keep
/// corpus order.
pub fn select_top_n(combined: &[f32], top_n: usize) -> Vec<usize> {
    // NaN ranks last so the comparator stays a total order
    let key = |i: usize| {
        let score = combined[i];
        if score.is_nan() {
            f32::NEG_INFINITY
        } else {
            score
        }
    };
    let mut positions: Vec<usize> = (0..combined.len()).collect();
    positions.sort_by(|&a, &b| {
        key(b)
            .partial_cmp(&key(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    positions.truncate(top_n);
    positions
}
