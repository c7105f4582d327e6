use std::collections::HashMap;

use crate::models::Corpus;
use crate::search::tokenize::tokenize;

/// TF-IDF vector space over one corpus.
///
/// Weights follow the usual smoothed scheme: `idf = ln((1 + n) / (1 + df)) + 1`,
/// `tf = 1 + ln(count)`, rows L2-normalized, so cosine similarity is a dot product.
pub struct SparseIndex {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    /// Per chunk: (term id, weight), sorted by term id.
    rows: Vec<Vec<(usize, f32)>>,
}

impl SparseIndex {
    pub fn fit(corpus: &Corpus) -> Self {
        let tokenized: Vec<Vec<String>> = corpus.texts().map(tokenize).collect();

        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: Vec<usize> = Vec::new();
        let mut counts_per_doc: Vec<HashMap<usize, u32>> = Vec::with_capacity(tokenized.len());

        for tokens in &tokenized {
            let mut counts: HashMap<usize, u32> = HashMap::new();
            for token in tokens {
                let next_id = vocabulary.len();
                let id = *vocabulary.entry(token.clone()).or_insert(next_id);
                if id == doc_freq.len() {
                    doc_freq.push(0);
                }
                *counts.entry(id).or_insert(0) += 1;
            }
            for id in counts.keys() {
                doc_freq[*id] += 1;
            }
            counts_per_doc.push(counts);
        }

        let n = tokenized.len() as f32;
        let idf: Vec<f32> = doc_freq
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0)
            .collect();

        let rows = counts_per_doc
            .into_iter()
            .map(|counts| weigh(&counts, &idf))
            .collect();

        Self {
            vocabulary,
            idf,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    /// Cosine similarity of `query` against every chunk, indexed by corpus position.
    ///
    /// Query terms missing from the corpus vocabulary carry no weight.
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let mut counts: HashMap<usize, u32> = HashMap::new();
        for token in tokenize(query) {
            if let Some(&id) = self.vocabulary.get(&token) {
                *counts.entry(id).or_insert(0) += 1;
            }
        }

        if counts.is_empty() {
            return vec![0.0; self.rows.len()];
        }

        let query_vec: HashMap<usize, f32> = weigh(&counts, &self.idf).into_iter().collect();

        self.rows
            .iter()
            .map(|row| {
                row.iter()
                    .filter_map(|(id, w)| query_vec.get(id).map(|q| q * w))
                    .sum()
            })
            .collect()
    }
}

/// Sublinear tf times idf, L2-normalized.
fn weigh(counts: &HashMap<usize, u32>, idf: &[f32]) -> Vec<(usize, f32)> {
    let mut row: Vec<(usize, f32)> = counts
        .iter()
        .map(|(&id, &count)| (id, (1.0 + (count as f32).ln()) * idf[id]))
        .collect();
    row.sort_by_key(|(id, _)| *id);

    let norm = row.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
    if norm > 0.0 {
        for (_, w) in row.iter_mut() {
            *w /= norm;
        }
    }
    row
}
