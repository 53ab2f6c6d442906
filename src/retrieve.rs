//! Hybrid retrieval over the index artifacts.
//!
//! Candidates come from both sides: a dense inner-product search when the
//! caller supplies a query vector, and the BM25 top slice otherwise or in
//! addition. The union is rescored with a fused formula that weighs cosine
//! similarity, plain token overlap, and code-symbol overlap, then a
//! diversity filter caps how many results one (chapter, section) may
//! contribute.

use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::config::Config;
use crate::index::{load_index, ChunkMeta, IndexArtifacts, IndexError};
use crate::tokenize::{is_symbol, tokenize};

const W_COSINE: f32 = 0.65;
const W_TOKEN: f32 = 0.25;
const W_SYMBOL: f32 = 0.10;

/// Knobs for one retrieval call.
#[derive(Debug, Clone, Copy)]
pub struct RetrieveParams {
    pub vector_top_k: usize,
    pub bm25_top_k: usize,
    pub final_k: usize,
    pub max_per_section: usize,
}

impl Default for RetrieveParams {
    fn default() -> Self {
        RetrieveParams {
            vector_top_k: 50,
            bm25_top_k: 50,
            final_k: 10,
            max_per_section: 3,
        }
    }
}

/// One ranked result with its score components.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub score: f32,
    pub cosine: f32,
    pub bm25: f32,
    pub token_overlap: f32,
    pub symbol_overlap: f32,
    pub meta: ChunkMeta,
}

/// Loaded, immutable searcher over one library's index artifacts.
pub struct Retriever {
    artifacts: IndexArtifacts,
    /// chunk_id -> corpus position.
    positions: HashMap<String, usize>,
}

impl Retriever {
    /// Load the live index at `root`. A missing index surfaces as
    /// [`IndexError::Unavailable`], never as an empty result set.
    pub fn load(root: &Path) -> Result<Self, IndexError> {
        let artifacts = load_index(root)?;
        let positions = artifacts
            .chunk_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Ok(Retriever {
            artifacts,
            positions,
        })
    }

    pub fn corpus_len(&self) -> usize {
        self.artifacts.chunk_ids.len()
    }

    /// Run one hybrid query. `query_vec` is the caller-embedded query; with
    /// `None` the dense side contributes nothing and ranking is lexical.
    pub fn retrieve(
        &self,
        query: &str,
        query_vec: Option<&[f32]>,
        params: &RetrieveParams,
    ) -> Vec<RetrievedChunk> {
        let query_tokens = tokenize(query);
        let query_set: HashSet<&str> = query_tokens.iter().map(|t| t.as_str()).collect();
        let query_symbols: HashSet<&str> =
            query_set.iter().copied().filter(|t| is_symbol(t)).collect();

        // Dense candidates: cosine per chunk_id.
        let mut cosines: HashMap<usize, f32> = HashMap::new();
        if let (Some(vec), Some(dense)) = (query_vec, self.artifacts.dense.as_ref()) {
            for (row, score) in dense.search(vec, params.vector_top_k) {
                let Some(id) = self.artifacts.dense_ids.get(row) else {
                    continue;
                };
                if let Some(&pos) = self.positions.get(id) {
                    cosines.insert(pos, score);
                }
            }
        }

        // Sparse candidates: BM25 scores normalized by the batch maximum.
        let ranked = self.artifacts.sparse.top_n(&query_tokens, params.bm25_top_k);
        let max_bm25 = ranked.first().map(|(_, s)| *s).unwrap_or(0.0);
        let mut bm25s: HashMap<usize, f32> = HashMap::new();
        for (pos, score) in ranked {
            let normalized = if max_bm25 > 0.0 { score / max_bm25 } else { 0.0 };
            bm25s.insert(pos, normalized);
        }

        let candidates: HashSet<usize> = cosines.keys().chain(bm25s.keys()).copied().collect();

        let mut scored: Vec<RetrievedChunk> = candidates
            .into_iter()
            .filter_map(|pos| {
                let meta = self.artifacts.meta.get(pos)?;
                let cosine = cosines.get(&pos).copied().unwrap_or(0.0);
                let bm25 = bm25s.get(&pos).copied().unwrap_or(0.0);

                let doc_set: HashSet<String> = tokenize(&meta.text).into_iter().collect();
                let token_overlap = overlap(&query_set, &doc_set);
                let symbol_overlap = overlap(&query_symbols, &doc_set);

                let score =
                    W_COSINE * cosine + W_TOKEN * token_overlap + W_SYMBOL * symbol_overlap;
                Some(RetrievedChunk {
                    chunk_id: meta.chunk_id.clone(),
                    score,
                    cosine,
                    bm25,
                    token_overlap,
                    symbol_overlap,
                    meta: meta.clone(),
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        // Diversity filter: cap results per (chapter, section) in score order.
        let mut picked: Vec<RetrievedChunk> = Vec::new();
        let mut per_section: HashMap<(String, String), usize> = HashMap::new();
        for chunk in scored {
            if picked.len() >= params.final_k {
                break;
            }
            let key = (chunk.meta.chapter.clone(), chunk.meta.section.clone());
            let seen = per_section.entry(key).or_insert(0);
            if *seen >= params.max_per_section {
                continue;
            }
            *seen += 1;
            picked.push(chunk);
        }
        picked
    }
}

/// Fraction of `query` tokens present in `doc`; 0 for an empty query set.
fn overlap(query: &HashSet<&str>, doc: &HashSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let hits = query.iter().filter(|t| doc.contains(**t)).count();
    hits as f32 / query.len() as f32
}

/// CLI entry point: run a lexical query and print the ranked results.
pub fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let retriever = Retriever::load(&config.library.root)?;
    let mut params = config.retrieval.params();
    if let Some(limit) = limit {
        params.final_k = limit;
    }
    let results = retriever.retrieve(query, None, &params);

    println!(
        "search {:?} over {} chunks",
        query,
        retriever.corpus_len()
    );
    if results.is_empty() {
        println!("  no matches");
        return Ok(());
    }
    for (rank, hit) in results.iter().enumerate() {
        let title = if hit.meta.section_title.is_empty() {
            hit.meta.book_name.as_str()
        } else {
            hit.meta.section_title.as_str()
        };
        println!(
            "  {:>2}. [{:.3}] {} ({}) bm25={:.3} overlap={:.2}",
            rank + 1,
            hit.score,
            title,
            hit.chunk_id,
            hit.bm25,
            hit.token_overlap,
        );
        let preview: String = hit.meta.text.chars().take(120).collect();
        println!("      {}", preview.replace('\n', " "));
    }
    Ok(())
}
