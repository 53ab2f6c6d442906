//! Lexical retrieval backend.
//!
//! The retriever only needs per-document relevance scores for a tokenized
//! query; [`SparseBackend`] is that seam. The shipped backend is a native
//! BM25-Okapi index built at index time and serialized whole into the
//! sparse artifact. The artifact is tagged with the backend name so other
//! scorers can be introduced without breaking old files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-document lexical scorer over a fixed corpus.
pub trait SparseBackend {
    /// Score every document in the corpus against the query tokens.
    /// The returned vector is corpus-ordered and has `len()` entries.
    fn scores(&self, query_tokens: &[String]) -> Vec<f32>;

    /// Top `n` documents by score, descending, ties broken by corpus
    /// position. Zero-scoring documents are never returned.
    fn top_n(&self, query_tokens: &[String], n: usize) -> Vec<(usize, f32)> {
        let scores = self.scores(query_tokens);
        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > 0.0)
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(n);
        ranked
    }

    /// Number of documents in the corpus.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Native BM25-Okapi index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    pub k1: f32,
    pub b: f32,
    doc_count: usize,
    avgdl: f32,
    /// Document frequency per term.
    df: HashMap<String, usize>,
    /// Term frequency per document.
    tf: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
}

const DEFAULT_K1: f32 = 1.5;
const DEFAULT_B: f32 = 0.75;

impl Bm25Index {
    /// Build the index from pre-tokenized documents.
    pub fn build(corpus: &[Vec<String>]) -> Self {
        let doc_count = corpus.len();
        let mut df: HashMap<String, usize> = HashMap::new();
        let mut tf: Vec<HashMap<String, usize>> = Vec::with_capacity(doc_count);
        let mut doc_lens: Vec<usize> = Vec::with_capacity(doc_count);

        for tokens in corpus {
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token.clone()).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *df.entry(term.clone()).or_insert(0) += 1;
            }
            doc_lens.push(tokens.len());
            tf.push(freqs);
        }

        let avgdl = if doc_count == 0 {
            0.0
        } else {
            doc_lens.iter().sum::<usize>() as f32 / doc_count as f32
        };

        Bm25Index {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            doc_count,
            avgdl,
            df,
            tf,
            doc_lens,
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let df = self.df.get(term).copied().unwrap_or(0) as f32;
        let n = self.doc_count as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

impl SparseBackend for Bm25Index {
    fn scores(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.doc_count];
        if self.doc_count == 0 || self.avgdl == 0.0 {
            return scores;
        }
        for term in query_tokens {
            let idf = self.idf(term);
            for (doc, freqs) in self.tf.iter().enumerate() {
                let f = freqs.get(term).copied().unwrap_or(0) as f32;
                if f == 0.0 {
                    continue;
                }
                let dl = self.doc_lens[doc] as f32;
                let denom = f + self.k1 * (1.0 - self.b + self.b * dl / self.avgdl);
                scores[doc] += idf * f * (self.k1 + 1.0) / denom;
            }
        }
        scores
    }

    fn len(&self) -> usize {
        self.doc_count
    }
}

/// Serialized form of the sparse artifact, tagged by backend.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum SparseArtifact {
    Native { index: Bm25Index },
}

impl SparseArtifact {
    pub fn into_backend(self) -> Box<dyn SparseBackend> {
        match self {
            SparseArtifact::Native { index } => Box::new(index),
        }
    }
}
