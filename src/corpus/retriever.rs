//! TF-IDF retrieval over the corpus chunks.
//!
//! Lexical scoring is deliberate: it needs no external embedding service and
//! is adequate at the corpus sizes this system handles. Anything producing a
//! comparable ranking can sit behind the same interface.

use crate::corpus::{Corpus, DocumentChunk};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// A retrieved chunk with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f64,
}

/// Ordered retrieval output: at most k entries, descending by score, ties
/// broken by chunk id ascending. Never mutated after construction.
pub type RetrievalResult = Vec<ScoredChunk>;

struct IndexedChunk {
    chunk: DocumentChunk,
    tfidf: HashMap<String, f64>,
    norm: f64,
}

pub struct TfIdfIndex {
    chunks: Vec<IndexedChunk>,
    idf: HashMap<String, f64>,
}

impl TfIdfIndex {
    pub fn build(corpus: &Corpus) -> Self {
        let tokenized: Vec<(DocumentChunk, Vec<String>)> = corpus
            .chunks()
            .iter()
            .map(|c| (c.clone(), tokenize(&c.text)))
            .collect();

        // Document frequency per term.
        let mut df: HashMap<String, usize> = HashMap::new();
        for (_, tokens) in &tokenized {
            let mut seen: Vec<&String> = tokens.iter().collect();
            seen.sort();
            seen.dedup();
            for term in seen {
                *df.entry(term.clone()).or_default() += 1;
            }
        }

        let n = tokenized.len().max(1) as f64;
        let idf: HashMap<String, f64> = df
            .into_iter()
            .map(|(term, count)| (term, (n / (1.0 + count as f64)).ln() + 1.0))
            .collect();

        let chunks = tokenized
            .into_iter()
            .map(|(chunk, tokens)| {
                let tfidf = weigh(&tokens, &idf);
                let norm = l2_norm(&tfidf);
                IndexedChunk { chunk, tfidf, norm }
            })
            .collect();

        Self { chunks, idf }
    }

    /// Return the top-k chunks for the query, descending by similarity with
    /// chunk-id tiebreak. Empty query or empty index yields an empty result.
    pub fn retrieve(&self, query: &str, k: usize) -> RetrievalResult {
        let tokens = tokenize(query);
        if tokens.is_empty() || self.chunks.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_vec = weigh(&tokens, &self.idf);
        let query_norm = l2_norm(&query_vec);
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut scored: Vec<ScoredChunk> = self
            .chunks
            .iter()
            .map(|indexed| {
                let dot: f64 = query_vec
                    .iter()
                    .filter_map(|(term, w)| indexed.tfidf.get(term).map(|cw| w * cw))
                    .sum();
                let score = if indexed.norm == 0.0 {
                    0.0
                } else {
                    dot / (query_norm * indexed.norm)
                };
                ScoredChunk {
                    chunk: indexed.chunk.clone(),
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        scored.truncate(k);

        debug!(
            "Retrieved {} chunks for query, top score {:.4}",
            scored.len(),
            scored.first().map(|s| s.score).unwrap_or(0.0)
        );
        scored
    }
}

/// Lowercase alphanumeric terms, minimum length 2.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.len() >= 2)
        .map(|s| s.to_lowercase())
        .collect()
}

fn weigh(tokens: &[String], idf: &HashMap<String, f64>) -> HashMap<String, f64> {
    let mut tf: HashMap<String, f64> = HashMap::new();
    for tok in tokens {
        *tf.entry(tok.clone()).or_default() += 1.0;
    }
    let total = tokens.len() as f64;
    tf.into_iter()
        .map(|(term, count)| {
            let weight = (count / total) * idf.get(&term).copied().unwrap_or(1.0);
            (term, weight)
        })
        .collect()
}

fn l2_norm(vec: &HashMap<String, f64>) -> f64 {
    vec.values().map(|w| w * w).sum::<f64>().sqrt()
}
