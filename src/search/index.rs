use anyhow::Result;

use crate::search::bm25::LexicalIndex;
use crate::search::tfidf::SparseIndex;
use crate::search::vector::{CollectionHandle, VectorStore};

/// Everything built for one corpus generation.
///
/// Each signal is optional: a missing index scores every chunk 0.
pub struct IndexBundle {
    pub lexical: Option<LexicalIndex>,
    pub sparse: Option<SparseIndex>,
    pub dense: Option<CollectionHandle>,
    /// Name of the dense collection, kept so it can be reopened or deleted
    /// even when no live handle exists.
    pub collection_name: Option<String>,
    num_chunks: usize,
}

impl IndexBundle {
    /// Bundle for an empty corpus: no signals at all.
    pub fn empty() -> Self {
        Self {
            lexical: None,
            sparse: None,
            dense: None,
            collection_name: None,
            num_chunks: 0,
        }
    }

    pub(crate) fn new(
        lexical: LexicalIndex,
        sparse: SparseIndex,
        dense: Option<CollectionHandle>,
        collection_name: Option<String>,
        num_chunks: usize,
    ) -> Self {
        Self {
            lexical: Some(lexical),
            sparse: Some(sparse),
            dense,
            collection_name,
            num_chunks,
        }
    }

    /// Number of chunks the bundle was built over.
    pub fn len(&self) -> usize {
        self.num_chunks
    }

    pub fn is_empty(&self) -> bool {
        self.num_chunks == 0
    }

    pub fn has_dense(&self) -> bool {
        self.dense.is_some()
    }

    /// Drop this generation's dense collection. Called after a newer
    /// generation has replaced it.
    pub fn retire(&self, store: &dyn VectorStore) -> Result<()> {
        if let Some(name) = &self.collection_name {
            store.delete_collection(name)?;
            tracing::info!("Retired dense collection {name}");
        }
        Ok(())
    }
}

impl std::fmt::Debug for IndexBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBundle")
            .field("lexical", &self.lexical.is_some())
            .field("sparse", &self.sparse.is_some())
            .field("dense", &self.dense)
            .field("collection_name", &self.collection_name)
            .field("num_chunks", &self.num_chunks)
            .finish()
    }
}
