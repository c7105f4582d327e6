//! Splitting repository files into retrieval chunks.

pub mod recursive;

use anyhow::Result;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::git::RepoFile;
use crate::models::{Chunk, Corpus};

pub use recursive::RecursiveSplitter;

/// Split every file and assign identifiers.
///
/// Each file gets a fresh v4 `file_id`; its chunks are numbered
/// `{file_id}_chunk_{i}` in split order. Files that produce no chunks
/// contribute nothing.
pub fn build_corpus(files: &[RepoFile], config: &ChunkingConfig) -> Result<Corpus> {
    let splitter = RecursiveSplitter::new(config);
    let mut chunks = Vec::new();

    for file in files {
        let file_id = Uuid::new_v4().to_string();
        for (i, text) in splitter.split(&file.content).into_iter().enumerate() {
            chunks.push(Chunk {
                chunk_id: format!("{file_id}_chunk_{i}"),
                file_id: file_id.clone(),
                source_path: file.relative_path.clone(),
                text,
            });
        }
    }

    tracing::debug!("Split {} files into {} chunks", files.len(), chunks.len());
    Corpus::new(chunks)
}
