//! Pick the answer that agrees most with the other models' answers.

use thiserror::Error;

use crate::llm::embeddings::Embedder;
use crate::models::{CandidateAnswer, ConsensusResult, ModelScore};

/// Returned as the answer when every model call failed.
pub const NO_VALID_RESPONSES: &str = "No valid responses received from any model.";

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("failed to embed candidate answers: {0:#}")]
    Embedding(anyhow::Error),

    #[error("expected {expected} answer embeddings, got {got}")]
    MissingEmbeddings { expected: usize, got: usize },

    #[error("answer embeddings have mismatched dimensions")]
    DimensionMismatch,
}

/// Choose the candidate with the highest mean cosine similarity to its peers.
///
/// Failed candidates are ignored. With no valid candidate the result is
/// [`NO_VALID_RESPONSES`]; with exactly one it is returned verbatim with a
/// score of 1.0. Embedding failures with two or more valid candidates are
/// returned to the caller.
pub async fn select_consensus(
    candidates: &[CandidateAnswer],
    embedder: &dyn Embedder,
) -> Result<ConsensusResult, ConsensusError> {
    let valid: Vec<(&str, &str)> = candidates
        .iter()
        .filter_map(|c| c.text().map(|text| (c.model.as_str(), text)))
        .collect();

    match valid.as_slice() {
        [] => {
            return Ok(ConsensusResult {
                text: NO_VALID_RESPONSES.to_string(),
                winner: None,
                scores: Vec::new(),
                fallback: false,
            })
        }
        [(model, text)] => {
            return Ok(ConsensusResult {
                text: (*text).to_string(),
                winner: Some((*model).to_string()),
                scores: vec![ModelScore {
                    model: (*model).to_string(),
                    avg_similarity: 1.0,
                }],
                fallback: false,
            })
        }
        _ => {}
    }

    let texts: Vec<String> = valid.iter().map(|(_, text)| (*text).to_string()).collect();
    let embeddings = embedder
        .embed_many(&texts)
        .await
        .map_err(ConsensusError::Embedding)?;

    if embeddings.len() != valid.len() {
        return Err(ConsensusError::MissingEmbeddings {
            expected: valid.len(),
            got: embeddings.len(),
        });
    }
    let dim = embeddings[0].len();
    if dim == 0 || embeddings.iter().any(|e| e.len() != dim) {
        return Err(ConsensusError::DimensionMismatch);
    }

    let averages = mean_peer_similarity(&embeddings);

    let mut order: Vec<usize> = (0..valid.len()).collect();
    // NaN (from a broken embedding) ranks last
    let key = |i: usize| {
        if averages[i].is_nan() {
            f64::NEG_INFINITY
        } else {
            averages[i]
        }
    };
    // Stable: equal averages keep input order
    order.sort_by(|&a, &b| {
        key(b)
            .partial_cmp(&key(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let scores: Vec<ModelScore> = order
        .iter()
        .map(|&i| ModelScore {
            model: valid[i].0.to_string(),
            avg_similarity: averages[i],
        })
        .collect();

    let (winner_model, winner_text) = valid[order[0]];
    tracing::debug!(
        "Consensus winner {winner_model} ({:.4}) among {} answers",
        averages[order[0]],
        valid.len()
    );

    Ok(ConsensusResult {
        text: winner_text.to_string(),
        winner: Some(winner_model.to_string()),
        scores,
        fallback: false,
    })
}

/// [`select_consensus`], falling back to the first valid answer verbatim
/// when similarity cannot be computed.
pub async fn consensus_or_first_valid(
    candidates: &[CandidateAnswer],
    embedder: &dyn Embedder,
) -> ConsensusResult {
    match select_consensus(candidates, embedder).await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!("Consensus failed, using first valid answer: {e}");
            let first = candidates
                .iter()
                .find_map(|c| c.text().map(|text| (c.model.clone(), text.to_string())));
            match first {
                Some((model, text)) => ConsensusResult {
                    text,
                    winner: Some(model),
                    scores: Vec::new(),
                    fallback: true,
                },
                None => ConsensusResult {
                    text: NO_VALID_RESPONSES.to_string(),
                    winner: None,
                    scores: Vec::new(),
                    fallback: true,
                },
            }
        }
    }
}

/// Mean cosine similarity of each vector to every other vector.
///
/// Self-similarity is excluded; a single vector scores 1.0.
pub fn mean_peer_similarity(embeddings: &[Vec<f32>]) -> Vec<f64> {
    let n = embeddings.len();
    if n == 1 {
        return vec![1.0];
    }

    let mut matrix = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let sim = cosine_similarity_f64(&embeddings[i], &embeddings[j]);
            matrix[i][j] = sim;
            matrix[j][i] = sim;
        }
    }

    matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let total: f64 = row
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, s)| s)
                .sum();
            total / (n - 1) as f64
        })
        .collect()
}

fn cosine_similarity_f64(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_excludes_self() {
        let e = vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        let avg = mean_peer_similarity(&e);
        assert!((avg[0] - 0.5).abs() < 1e-9);
        assert!((avg[1] - 0.5).abs() < 1e-9);
        assert!(avg[2].abs() < 1e-9);
    }

    #[test]
    fn test_mean_two_vectors_is_their_similarity() {
        let e = vec![vec![1.0, 1.0], vec![1.0, 0.0]];
        let avg = mean_peer_similarity(&e);
        let expected = 1.0 / 2.0f64.sqrt();
        assert!((avg[0] - expected).abs() < 1e-6);
        assert!((avg[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_single_vector_scores_one() {
        assert_eq!(mean_peer_similarity(&[vec![0.3, 0.4]]), vec![1.0]);
    }

    #[test]
    fn test_opposite_vectors_negative() {
        let avg = mean_peer_similarity(&[vec![1.0, 0.0], vec![-1.0, 0.0]]);
        assert!((avg[0] + 1.0).abs() < 1e-9);
    }
}
