use anyhow::{Context, Result};
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, NumericOptions, Schema, TantivyDocument, TextFieldIndexing,
    TextOptions, Value, STORED,
};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

use crate::models::Corpus;
use crate::search::tokenize::{code_analyzer, tokenize, CODE_TOKENIZER};

/// BM25 index over one corpus, built on an in-RAM tantivy index.
///
/// One tantivy document per chunk, tagged with its corpus position so
/// scores can be laid out as a full-length vector.
pub struct LexicalIndex {
    reader: IndexReader,
    f_position: Field,
    f_text: Field,
    num_chunks: usize,
}

impl LexicalIndex {
    /// Tokenize and index every chunk of `corpus`.
    pub fn build(corpus: &Corpus) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let f_position =
            schema_builder.add_u64_field("position", NumericOptions::default() | STORED);
        let text_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(CODE_TOKENIZER)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        );
        let f_text = schema_builder.add_text_field("text", text_options);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        index.tokenizers().register(CODE_TOKENIZER, code_analyzer());

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, 50_000_000)
            .context("Failed to create index writer")?;

        for (position, chunk) in corpus.chunks().iter().enumerate() {
            writer.add_document(doc!(
                f_position => position as u64,
                f_text => chunk.text.clone(),
            ))?;
        }

        writer.commit().context("Failed to commit lexical index")?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create reader")?;

        Ok(Self {
            reader,
            f_position,
            f_text,
            num_chunks: corpus.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.num_chunks
    }

    pub fn is_empty(&self) -> bool {
        self.num_chunks == 0
    }

    /// BM25 score of every chunk for `query`, indexed by corpus position.
    ///
    /// Query tokens are summed, repeats included; chunks sharing no token score 0.
    pub fn scores(&self, query: &str) -> Result<Vec<f32>> {
        let mut scores = vec![0.0f32; self.num_chunks];
        let tokens = tokenize(query);
        if tokens.is_empty() || self.num_chunks == 0 {
            return Ok(scores);
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = tokens
            .iter()
            .map(|token| {
                let term = Term::from_field_text(self.f_text, token);
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(self.num_chunks))
            .context("Lexical search failed")?;

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;
            let position = doc
                .get_first(self.f_position)
                .and_then(|v| v.as_u64())
                .context("Indexed chunk has no position")? as usize;
            if let Some(slot) = scores.get_mut(position) {
                *slot = score;
            }
        }

        Ok(scores)
    }
}
